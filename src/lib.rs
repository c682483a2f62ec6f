//! Bluetooth Low Energy demos for the Raspberry Pi Pico W.
//!
//! Every `ble_*` module is one self-contained demo with a `run()` entry point that is generic
//! over the TrouBLE [`Controller`](trouble_host::Controller) and the board peripherals it
//! drives. The firmware crates under `boards/` bring up the radio and call them.
//!
//! Stack events of every demo flow through one [`dispatch::Dispatcher`], which keeps the
//! [`link::LinkState`] current and hands the demo's [`dispatch::Role`] only events that refer
//! to live links.
#![cfg_attr(not(test), no_std)]
#![allow(async_fn_in_trait)]

pub(crate) mod fmt;

pub mod adv;
pub mod audio;
pub mod config;
pub mod dispatch;
pub mod eink;
pub mod error;
pub mod event;
pub mod indicator;
pub mod link;
pub mod media;
pub mod rgb;
pub mod ring;
pub mod security;

mod common;

pub mod ble_audio_sink;
pub mod ble_audio_source;
pub mod ble_eink_display;
pub mod ble_kitchen_sink;
pub mod ble_l2cap_echo;
pub mod ble_led_central;
pub mod ble_led_peripheral;
pub mod ble_media_central;
pub mod ble_notify_demo;
pub mod ble_pairing_demo;

pub use error::Error;
