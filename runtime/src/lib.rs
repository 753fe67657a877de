// Copyright 2026 Tanuki Notifier Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tanuki notifier library: watches the shop's special-offer feed and
//! announces each new offer to a Telegram channel.
//!
//! The pieces compose bottom-up:
//!
//! - [`acquisition`] fetches the feed and menu documents over HTTP.
//! - [`feed`] decodes the current offer.
//! - [`catalog`] scrapes the menu into a product catalog and caches it.
//! - [`reconcile`] joins an offer with its product and builds the message.
//! - [`notify`] delivers the message.
//! - [`scheduler`] runs the whole thing on a loop.

pub mod acquisition;
pub mod catalog;
pub mod config;
pub mod feed;
pub mod logging;
pub mod notify;
pub mod reconcile;
pub mod scheduler;
pub mod wire;
