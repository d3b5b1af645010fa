//! Isolated runtime environments (Python venv / Node modules), cached per
//! package set.

pub mod builder;
