pub mod aggregate;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod ports;
pub mod process;
pub mod reply;
pub mod scheme;
pub mod status;
pub mod store;
pub mod sweeper;
pub mod types;
pub mod utils;

pub use config::{EngineConfig, LoadOptions, LogFormat};
pub use engine::ApprovalEngine;
pub use error::{ApprovalError, Result};
pub use ledger::{Step, StepLedger, StepStatus};
pub use ports::{ChangeRecord, Clock, Invitation, Notifier, NotifyOutcome, ObjectStore, SystemClock, TrackedObject};
pub use process::{ApprovalProcess, InvitationText, ProcessRegistry};
pub use scheme::{ApprovalScheme, SchemeStatus, VoteOutcome};
pub use status::SchemeSummary;
pub use store::{SchemeStore, SledSchemeStore};
pub use sweeper::{SweepReport, TimeoutSweeper};
pub use types::{EntityKind, EntityRef, Passcode, SchemeId, TimeStamp};
