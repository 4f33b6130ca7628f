//! Element physics evaluated by the error indicators.

pub mod fe;
