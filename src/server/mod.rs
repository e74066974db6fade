/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Inbound DNS listeners feeding the dispatcher

pub mod udp;

pub use udp::UdpServer;
