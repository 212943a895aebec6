/*!
Module providing the small building blocks shared by every subsystem: frame
pacing, the coalescing action queue, the background worker lifecycle and file
naming helpers.
*/

pub mod action_queue;
pub mod confy;
pub mod enum_tools;
pub mod file_names;
pub mod frame_clock;
pub mod worker;

/// Returns `true` when the value is neither NaN nor infinite.
pub fn is_number(value: f64) -> bool {
    value.is_finite()
}

pub fn is_vector(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}
