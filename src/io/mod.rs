/*!
Helper functions for saving posterior draws to disk.
*/

#[cfg(feature = "csv")]
pub mod csv;
