pub mod grade;
pub mod loaders;
pub mod session;

pub use grade::{
    GradeRecord, ModelTryKey, ParseOutcome, RawResponse, TokenUsage, ValidationError,
    PARSE_ERROR_QUESTION_ID,
};
pub use loaders::{load_all_session_files, load_session_config};
pub use session::{
    GradingTarget, GradingUnit, ModelPairSpec, ModelSpec, PromptTemplates, QuestionSpec,
    SessionConfig, SessionStatus,
};
