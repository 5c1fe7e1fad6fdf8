//! # rfs-sftp
//!
//! Session and remote-operation layer: authenticated SSH/SFTP sessions kept in
//! a registry, and a per-session facade for guarded file operations.

pub mod sftp;
