// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Pick dotfiles out of other people's repositories.
//!
//! Dotfile creators publish their configurations as git repositories, but
//! every creator organizes theirs differently. Dotpick takes a registry entry
//! like "the Neovim config of creator X, found at `.config/nvim`" and works
//! out where that configuration really lives inside the creator's repository,
//! then deploys it into the user's home without losing anything that was
//! already there.
//!
//! # Pipeline
//!
//! 1. [`fetch`]: clone or update the creator's repository in a local cache.
//! 2. [`repo::layout`]: classify how the repository is organized.
//! 3. [`repo::resolve`]: map logical paths onto real files, materializing git
//!    submodules through [`repo::submodule`] when needed.
//! 4. [`deploy::diff`]: preview every change.
//! 5. [`deploy::apply`]: back up and write, see [`deploy::backup`].
//!
//! A logical path that cannot be located is not an error. It comes back as
//! [`repo::Resolution::NotFound`], so the caller can let a human pick the
//! directory instead.

pub mod config;
pub mod deploy;
pub mod fetch;
pub mod model;
pub mod path;
pub mod repo;

pub use model::{CreatorSpec, DotfileSpec, Layout, Owner, ResolvedFileMap};
pub use repo::{expand_selection, RepositorySnapshot, Resolution};
