// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The broker engine: registry, IP pool, and port tables.

pub mod ippool;
pub mod portmap;
pub mod registry;
pub mod service;

cfg_if! {
    if #[cfg(any(feature = "std", test))] {
        #[macro_export]
        macro_rules! dbg_macro {
            ($s:tt) => {
                println!($s);
            };
            ($s:tt, $($arg:tt)*) => {
                println!($s, $($arg)*);
            };
        }

        #[macro_export]
        macro_rules! err_macro {
            ($s:tt) => {
                println!(concat!("ERROR: ", $s));
            };
            ($s:tt, $($arg:tt)*) => {
                println!(concat!("ERROR: ", $s), $($arg)*);
            };
        }
    } else {
        // The hypervisor console printer lives with the excluded
        // platform glue; in a pure kernel build the messages are
        // formatted and dropped.
        #[macro_export]
        macro_rules! dbg_macro {
            ($s:tt) => {
                let _ = format_args!($s);
            };
            ($s:tt, $($arg:tt)*) => {
                let _ = format_args!($s, $($arg)*);
            };
        }

        #[macro_export]
        macro_rules! err_macro {
            ($s:tt) => {
                let _ = format_args!(concat!("ERROR: ", $s));
            };
            ($s:tt, $($arg:tt)*) => {
                let _ = format_args!(concat!("ERROR: ", $s), $($arg)*);
            };
        }
    }
}

pub use dbg_macro as dbg;
pub use err_macro as err;
