//! This module provides various utility functions needed throughout blocks.

pub(crate) mod file_checksum;
pub(crate) mod file_fs;
