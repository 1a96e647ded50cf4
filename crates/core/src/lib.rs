//! slotclaim: claims reservation slots the moment they unlock.
//!
//! The [`Orchestrator`] waits for the unlock instant on a skew-corrected
//! [`ClockService`], then races one claim attempt per resource through the
//! remote site's nested surfaces with the [`ExecutionEngine`], and classifies
//! each free-text answer into a [`ClaimStatus`].

pub mod browser;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod navigator;
pub mod orchestrator;
pub mod report;
pub mod schedule;
pub mod session;
pub mod site;

pub use browser::{Browser, BrowserContext, CdpBrowser, FrameInfo, OptionChoice, Page, SelectOption};
pub use classifier::{ClaimOutcome, ClaimStatus, Classifier, Rule, RuleSpec, classify, normalize};
pub use clock::{ClockService, SystemTime, TimeSource, UnlockSchedule};
pub use config::{ResourceTarget, RunConfig, Timing};
pub use engine::{EngineOptions, ExecutionEngine, InvalidationSignal};
pub use error::{ClaimError, FailureKind, Result, SlotResolutionError, UnlockTimeout};
pub use frame::{FrameHandle, FramePredicate, locate_frame};
pub use navigator::{NavState, Navigator, ResultCapture, ResultSource, SlotMatch, SlotSelection, Submit, Timeouts, UnlockPollState};
pub use orchestrator::Orchestrator;
pub use report::{AttemptRecord, AttemptResult, ClaimRequest, EntryStatus, FallbackEvent, LogSink, PhaseTimings, ReportEntry, ReportSink, RunReport, UnlockMark};
pub use schedule::{ScheduleSpec, ScheduleTable, SlotId};
pub use session::{Credentials, SessionHandle, SessionManager, SessionMode, SessionPool};
pub use site::SiteProfile;
