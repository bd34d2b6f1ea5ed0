//! Perception subsystem: C1–C7.
//!
//! ```text
//! frame ─► flow (C1) ─► ego_motion (C2) ───────┐
//!                │                              ├─► pipeline (C6) ─► {trajectory(C3), proximity(C5), ambient(C4)}
//!                └─► shared detector (C7) ──────┘
//! ```

pub mod ambient;
pub mod detection;
pub mod ego_motion;
pub mod flow;
pub mod frame;
pub mod pipeline;
pub mod proximity;
pub mod shared;
pub mod trajectory;
