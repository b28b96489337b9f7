// ABOUTME: Shared configuration surface for Runbox crates
// ABOUTME: Re-exports environment variable names and their default values

pub mod constants;
pub mod defaults;
