// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Print registry state in a human-friendly manner.
//!
//! This is mostly just a place to hang printing routines so that they
//! can be used by both debugging tools and integration tests.

use crate::api::FrontendSlotSnapshot;
use crate::api::IP_POOL_SIZE;
use crate::api::IpCfg;
use crate::api::MAX_FRONTENDS;
use std::io::Write;
use tabwriter::TabWriter;

/// Print a frontend table snapshot.
pub fn print_frontends(
    snap: &[FrontendSlotSnapshot; MAX_FRONTENDS],
) -> std::io::Result<()> {
    print_frontends_into(&mut std::io::stdout(), snap)
}

/// Print a frontend table snapshot into a given writer.
pub fn print_frontends_into(
    writer: &mut impl Write,
    snap: &[FrontendSlotSnapshot; MAX_FRONTENDS],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "SLOT\tDOMAIN\tSTATUS\tTX\tRX\tEVTCHN")?;

    for (idx, slot) in snap.iter().enumerate() {
        let status = if slot.status == crate::api::FRONTEND_ACTIVE {
            "active"
        } else {
            "dead"
        };
        writeln!(
            t,
            "{}\t{}\t{}\t{}\t{}\t{}",
            idx,
            slot.domid,
            status,
            slot.connect.tx_ring_ref,
            slot.connect.rx_ring_ref,
            slot.connect.event_channel,
        )?;
    }

    t.flush()
}

/// Print the contents of an IP pool payload, one line per entry, with
/// the trailing shared address called out.
pub fn print_ip_pool(
    entries: &[IpCfg; IP_POOL_SIZE + 1],
) -> std::io::Result<()> {
    print_ip_pool_into(&mut std::io::stdout(), entries)
}

/// Print the contents of an IP pool payload into a given writer.
pub fn print_ip_pool_into(
    writer: &mut impl Write,
    entries: &[IpCfg; IP_POOL_SIZE + 1],
) -> std::io::Result<()> {
    let mut t = TabWriter::new(writer);
    writeln!(t, "ENTRY\tADDRESS\tNETMASK\tMTU")?;

    for (idx, cfg) in entries.iter().enumerate() {
        let label = if idx == IP_POOL_SIZE {
            "shared".to_string()
        } else {
            idx.to_string()
        };

        if cfg.is_empty() {
            writeln!(t, "{label}\t-\t-\t-")?;
        } else {
            writeln!(
                t,
                "{}\t{}\t{}\t{}",
                label, cfg.addr, cfg.netmask, cfg.mtu
            )?;
        }
    }

    t.flush()
}

/// Print a horizontal rule.
pub fn write_hr(t: &mut impl Write) -> std::io::Result<()> {
    writeln!(t, "{:-<70}", "-")
}
