//! Trace sinks and recording helpers for the `hfsm` runtime.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![forbid(unsafe_code)]

pub mod recorder;
pub mod sinks;

pub use recorder::{CcRecord, CcRecorder, CcRecorderHandle};
pub use sinks::{TraceLog, VecTraceSink};
