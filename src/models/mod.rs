pub mod feedback;
pub mod record;
pub mod session;

pub use feedback::{Difficulty, DifficultyDistribution, FeedbackCandidate, FeedbackQuestion};
pub use record::{ErrorRecord, ErrorType, MasteryLevel, QuestionAnalysis};
pub use session::{
    DialogueState, GuideSession, ReplyOutcome, SolutionChecklist, Turn, TurnOutcome,
};
