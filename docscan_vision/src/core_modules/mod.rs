// THEORY:
// `core_modules` holds the building blocks the pipeline composes. The leaves (quad,
// filter, perspective, overlay) are pure data and pure functions. The tracker and the
// cadence gate carry the only long-lived state, and the capture coordinator is the one
// piece that runs on its own asynchronous path.

pub mod cadence;
pub mod capture;
pub mod detector;
pub mod filter;
pub mod overlay;
pub mod perspective;
pub mod quad;
pub mod tracker;
