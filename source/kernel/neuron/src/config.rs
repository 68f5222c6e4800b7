// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Boot-time sizing of the host model.

use crate::task::NENV;

/// Resources the kernel is booted with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelConfig {
    /// Physical frames in the pool, including reserved frame 0.
    pub frames: usize,
    /// Env table slots.
    pub max_envs: usize,
}

impl KernelConfig {
    /// Default frame pool size (4 MiB).
    pub const DEFAULT_FRAMES: usize = 1024;
    /// Default env table size.
    pub const DEFAULT_MAX_ENVS: usize = 64;

    /// Overrides the frame pool size.
    #[must_use]
    pub const fn with_frames(mut self, frames: usize) -> Self {
        self.frames = frames;
        self
    }

    /// Overrides the env table size; clamped to the id encoding limit.
    #[must_use]
    pub const fn with_max_envs(mut self, max_envs: usize) -> Self {
        self.max_envs = if max_envs > NENV { NENV } else { max_envs };
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self { frames: Self::DEFAULT_FRAMES, max_envs: Self::DEFAULT_MAX_ENVS }
    }
}
