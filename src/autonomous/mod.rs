// =============================================================================
// Autonomous Loops (C9) — moderation, self-tuning, regime adaptation
// =============================================================================
//
// Each loop is a long-running worker handed to the supervisor as a
// `ComponentSpec` factory. All three read their working state back out of
// the state store on start so a restart resumes rather than re-learns from
// scratch, per the idempotent-on-restart requirement.
// =============================================================================

pub mod moderation;
pub mod regime_adapter;
pub mod self_tuning;
