//! Rate limiting: the ticks-timeline limiters and the token-pool variant.
//!
//! Two mechanisms cover the spectrum of pacing needs:
//!
//! - [`average::AverageRateLimiter`] / [`strict::StrictRateLimiter`] — the
//!   nano-ticks accumulator shared by all motors of an activity, blending
//!   isochronous and bursty pacing through the strictness knob.
//! - [`tokens::TokenPool`] + [`filler::TokenFiller`] — a refilled token
//!   accumulator for finer- or coarser-grained bursting.

pub mod average;
pub mod filler;
pub mod limiter;
pub mod strict;
pub mod tokens;

pub use average::AverageRateLimiter;
pub use filler::TokenFiller;
pub use limiter::RateLimiter;
pub use strict::StrictRateLimiter;
pub use tokens::TokenPool;
