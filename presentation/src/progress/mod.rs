//! Progress reporting during an engagement

pub mod reporter;
