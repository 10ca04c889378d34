//! Cluster root: the hart table and the shared, memory-mapped CLIC block.
//!
//! The cluster exposes one 4 KiB control page (cliccfg, clicinfo) followed
//! by Machine, Supervisor and User blocks of per-hart interrupt regions.
//! Each (mode, hart) region is 16 KiB: 4096 interrupts times one 4-byte
//! word of `{ip, ie, attr, ctl}`. All accesses are byte-granular.

use log::trace;

use crate::hart::clic::{Cliccfg, Clicinfo};
use crate::hart::{Config, Hart};
use crate::PrivilegeLevel;

const PAGE_BYTES: u32 = 4096;
// One (mode, hart) interrupt region spans four 4 KiB pages.
const PAGES_PER_REGION: u32 = 4;

// 4096 interrupts of one 4-byte word each fill a region exactly.
const_assert!(PAGES_PER_REGION * PAGE_BYTES == 4096 * 4);

/// A cluster of harts sharing one CLIC block.
#[derive(Debug)]
pub struct Cluster {
    harts: Vec<Hart>,
    cliccfg: Cliccfg,
    clicinfo: Clicinfo,
}

/// Where a CLIC offset landed after demultiplexing.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum ClicAccess {
    /// Control page, with the word and byte index within it.
    Control { word: u32, byte: u32 },
    /// Interrupt page: target hart, page mode, interrupt index and byte
    /// lane within the interrupt's word.
    Interrupt {
        hart: usize,
        mode: PrivilegeLevel,
        index: u32,
        byte: u32,
    },
    /// Beyond the mapped block.
    Unmapped,
}

impl Cluster {
    /// Create a cluster of `num_harts` harts with the given per-hart
    /// configuration. Hart IDs are assigned contiguously from
    /// `config.hart_id`.
    pub fn new(config: Config, num_harts: usize) -> Self {
        assert!(num_harts >= 1, "a cluster holds at least one hart");

        let harts: Vec<Hart> = (0..num_harts)
            .map(|i| {
                let mut hart_config = config.clone();
                hart_config.hart_id = config.hart_id + i as u32;
                Hart::new(hart_config)
            })
            .collect();

        let mut cliccfg = Cliccfg::default();
        let mut clicinfo = Clicinfo::default();
        if let Some(cc) = &config.clic {
            cliccfg.set_nvbits(cc.sel_hvec);
            clicinfo = Clicinfo::new(harts[0].int_num(), cc.version, cc.intctl_bits);
        }

        Self {
            harts,
            cliccfg,
            clicinfo,
        }
    }

    pub fn num_harts(&self) -> usize {
        self.harts.len()
    }

    pub fn hart(&self, index: usize) -> &Hart {
        &self.harts[index]
    }

    pub fn hart_mut(&mut self, index: usize) -> &mut Hart {
        &mut self.harts[index]
    }

    pub fn harts(&self) -> &[Hart] {
        &self.harts
    }

    pub(crate) fn harts_mut(&mut self) -> &mut [Hart] {
        &mut self.harts
    }

    pub fn cliccfg(&self) -> Cliccfg {
        self.cliccfg
    }

    /// Install a cliccfg value verbatim (snapshot restore); the caller is
    /// responsible for refreshing the hart mirrors.
    pub(crate) fn set_cliccfg_raw(&mut self, cfg: Cliccfg) {
        self.cliccfg = cfg;
    }

    pub fn clicinfo(&self) -> Clicinfo {
        self.clicinfo
    }

    fn clic_present(&self) -> bool {
        self.harts[0].config().clic.is_some()
    }

    /// Base address and size in bytes of the memory-mapped CLIC block, for
    /// the host to install a callback range over.
    pub fn clic_region(&self) -> Option<(u32, u32)> {
        let config = self.harts[0].config().clic.as_ref()?;
        let num_pages = 1 + (self.harts.len() as u32 * 3) * PAGES_PER_REGION;
        Some((config.mclicbase, num_pages * PAGE_BYTES))
    }

    fn demux(&self, offset: u32) -> ClicAccess {
        let page = offset / PAGE_BYTES;
        if page == 0 {
            return ClicAccess::Control {
                word: (offset % PAGE_BYTES) / 4,
                byte: offset % 4,
            };
        }

        let num_harts = self.harts.len() as u32;
        let region = (page - 1) / PAGES_PER_REGION;
        if region >= 3 * num_harts {
            return ClicAccess::Unmapped;
        }

        let mode = match region / num_harts {
            0 => PrivilegeLevel::Machine,
            1 => PrivilegeLevel::Supervisor,
            _ => PrivilegeLevel::User,
        };

        ClicAccess::Interrupt {
            hart: (region % num_harts) as usize,
            mode,
            index: ((offset - PAGE_BYTES) / 4) % 4096,
            byte: offset % 4,
        }
    }

    /// Read `buf.len()` bytes from the CLIC block at `offset` (relative to
    /// the block base). Invisible interrupts read as zero.
    pub fn clic_read(&mut self, offset: u32, buf: &mut [u8]) {
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = self.read_clic_byte(offset.wrapping_add(i as u32));
        }
    }

    /// Write `buf.len()` bytes to the CLIC block at `offset`. Writes to
    /// invisible interrupts and read-only bytes are silently dropped.
    pub fn clic_write(&mut self, offset: u32, buf: &[u8]) {
        for (i, &value) in buf.iter().enumerate() {
            self.write_clic_byte(offset.wrapping_add(i as u32), value);
        }
    }

    fn read_clic_byte(&mut self, offset: u32) -> u8 {
        if !self.clic_present() {
            return 0;
        }

        trace!("CLIC READ offset={offset:#x}");

        match self.demux(offset) {
            ClicAccess::Control { word, byte } => {
                let value = match word {
                    0 => self.cliccfg.as_raw() as u32,
                    1 => self.clicinfo.as_raw(),
                    _ => 0,
                };
                (value >> (byte * 8)) as u8
            }
            ClicAccess::Interrupt {
                hart,
                mode,
                index,
                byte,
            } => {
                let hart = &self.harts[hart];
                if hart.clic_visible(index, mode) {
                    (hart.clic_int_value(index) >> (byte * 8)) as u8
                } else {
                    0
                }
            }
            ClicAccess::Unmapped => 0,
        }
    }

    fn write_clic_byte(&mut self, offset: u32, value: u8) {
        if !self.clic_present() {
            return;
        }

        trace!("CLIC WRITE offset={offset:#x} value={value:#04x}");

        match self.demux(offset) {
            ClicAccess::Control { .. } if offset == 0 => self.write_cliccfg(value),
            ClicAccess::Control { .. } => {}
            ClicAccess::Interrupt {
                hart,
                mode,
                index,
                byte,
            } => {
                let hart = &mut self.harts[hart];
                if !hart.clic_visible(index, mode) {
                    return;
                }
                let index = index as usize;
                match byte {
                    0 => hart.write_clic_pending(index, value),
                    1 => hart.write_clic_enable(index, value),
                    2 => hart.write_clic_attr(index, value, mode),
                    _ => hart.write_clic_ctl(index, value),
                }
            }
            ClicAccess::Unmapped => {}
        }
    }

    /// Update cliccfg: clear WPRI bits, clamp nmbits and nlbits to their
    /// legal maxima, preserve the read-only nvbits. Any change is mirrored
    /// into every hart and re-runs selection cluster-wide, since the mode
    /// interpretation of every interrupt may have changed.
    pub fn write_cliccfg(&mut self, value: u8) {
        let Some(cc) = self.harts[0].config().clic.clone() else {
            return;
        };

        let mut cfg = Cliccfg::from_raw(value);
        cfg.clear_wpri();
        if cfg.nmbits() > cc.cfg_mbits {
            cfg.set_nmbits(cc.cfg_mbits);
        }
        if cfg.nlbits() > 8 {
            cfg.set_nlbits(8);
        }
        cfg.set_nvbits(cc.sel_hvec);

        if cfg != self.cliccfg {
            self.cliccfg = cfg;
            for hart in &mut self.harts {
                hart.set_cliccfg_mirror(cfg);
                hart.test_interrupt();
            }
        }
    }

    /// Reset input for one hart. A falling edge performs the full hart
    /// reset and additionally resets the shared CLIC configuration.
    pub fn set_reset(&mut self, hart: usize, value: bool) {
        let did_reset = self.harts[hart].set_reset(value);
        if did_reset && self.clic_present() {
            self.write_cliccfg(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hart::{ClicConfig, Config};

    fn clic_config() -> Config {
        Config {
            clic: Some(ClicConfig::default()),
            local_int_num: 16,
            ..Config::default()
        }
    }

    fn cluster(num_harts: usize) -> Cluster {
        Cluster::new(clic_config(), num_harts)
    }

    // Offset of interrupt `index`, field byte `byte`, on `hart` through
    // the page block of `mode_block` (0 = M, 1 = S, 2 = U).
    fn offset(cluster: &Cluster, mode_block: u32, hart: u32, index: u32, byte: u32) -> u32 {
        let n = cluster.num_harts() as u32;
        4096 + (mode_block * n + hart) * 16384 + index * 4 + byte
    }

    #[test]
    fn test_region_size() {
        let cluster = cluster(2);
        let (base, size) = cluster.clic_region().unwrap();
        assert_eq!(0x0200_0000, base);
        assert_eq!((1 + 2 * 3 * 4) * 4096, size);
    }

    #[test]
    fn test_control_page_read() {
        let mut cluster = cluster(1);
        let mut buf = [0u8; 4];
        cluster.clic_read(4, &mut buf);
        let clicinfo = u32::from_le_bytes(buf);
        assert_eq!(32, clicinfo & 0x1FFF); // 16 standard + 16 local
        assert_eq!(4, (clicinfo >> 21) & 0xF); // CLICINTCTLBITS

        cluster.write_cliccfg(0b0000_1001); // nlbits=4, nvbits stays 1
        let mut byte = [0u8; 1];
        cluster.clic_read(0, &mut byte);
        assert_eq!(0b0000_1001, byte[0]);
    }

    #[test]
    fn test_cliccfg_clamps_fields() {
        let mut cluster = cluster(1);
        // nmbits=3 exceeds CLICCFGMBITS=2; nlbits=15 exceeds 8; WPRI bit
        // set; nvbits written as 0 but read-only 1.
        cluster.write_cliccfg(0b1111_1110);
        let cfg = cluster.cliccfg();
        assert_eq!(2, cfg.nmbits());
        assert_eq!(8, cfg.nlbits());
        assert!(cfg.nvbits());
        assert_eq!(0, cfg.as_raw() & 0x80);
    }

    #[test]
    fn test_interrupt_word_read_write() {
        let mut cluster = cluster(1);
        let ctl_offset = offset(&cluster, 0, 0, 42, 3);
        cluster.clic_write(ctl_offset, &[0xA0]);
        let mut buf = [0u8; 1];
        cluster.clic_read(ctl_offset, &mut buf);
        // CLICINTCTLBITS=4: low four bits read as one.
        assert_eq!(0xAF, buf[0]);

        // Whole-word access: ip, ie, attr, ctl.
        cluster.clic_write(offset(&cluster, 0, 0, 42, 0), &[1, 1]);
        let mut word = [0u8; 4];
        cluster.clic_read(offset(&cluster, 0, 0, 42, 0), &mut word);
        assert_eq!([1, 1, 0xC0, 0xAF], word);
    }

    #[test]
    fn test_pages_demux_per_hart() {
        let mut cluster = cluster(2);
        cluster.clic_write(offset(&cluster, 0, 1, 7, 1), &[1]);
        assert_eq!(0, cluster.hart(0).clic_int_value(7));
        assert_ne!(0, cluster.hart(1).clic_int_value(7));
    }

    #[test]
    fn test_supervisor_page_cannot_see_machine_interrupt() {
        let mut cluster = cluster(1);
        // Default attr.mode is Machine, so an S-page access is dropped.
        let s_ie = offset(&cluster, 1, 0, 5, 1);
        cluster.clic_write(s_ie, &[1]);
        assert_eq!(0, cluster.hart(0).clic_int_value(5));
        let mut buf = [0u8; 1];
        cluster.clic_read(offset(&cluster, 1, 0, 5, 3), &mut buf);
        assert_eq!(0, buf[0]);

        // Demote the interrupt to S via the M page (needs nmbits != 0),
        // then the S page sees it.
        cluster.write_cliccfg(0b0100_0000); // nmbits=2
        cluster.clic_write(offset(&cluster, 0, 0, 5, 2), &[0x40]); // mode=S
        cluster.clic_write(s_ie, &[1]);
        assert_ne!(0, cluster.hart(0).clic_int_value(5));
        cluster.clic_read(offset(&cluster, 1, 0, 5, 3), &mut buf);
        assert_eq!(0x0F, buf[0]);
    }

    #[test]
    fn test_unimplemented_standard_interrupt_invisible() {
        let mut cluster = cluster(1);
        // Cause 13 is not a standard interrupt: reads as zero, writes
        // dropped.
        let off = offset(&cluster, 0, 0, 13, 3);
        cluster.clic_write(off, &[0xFF]);
        let mut buf = [0u8; 1];
        cluster.clic_read(off, &mut buf);
        assert_eq!(0, buf[0]);
    }

    #[test]
    fn test_cliccfg_change_reselects_all_harts() {
        let mut cluster = cluster(2);
        cluster.write_cliccfg(0b0000_1001); // nlbits=4

        for i in 0..2 {
            let hart = cluster.hart_mut(i);
            hart.write_xtvec(PrivilegeLevel::Machine, 0x8000_0003, u32::MAX);
            hart.status_mut().set_ie(PrivilegeLevel::Machine, true);
            hart.write_clic_enable(20, 1);
            hart.write_clic_ctl(20, 0x40); // stored as 0x4F
            hart.write_clic_pending(20, 1);
            assert_eq!(0x4F, hart.clic_sel().level);
        }

        // Dropping nlbits to 0 changes every hart's presented level.
        cluster.write_cliccfg(0b0000_0001);
        for i in 0..2 {
            assert_eq!(0xFF, cluster.hart(i).clic_sel().level);
        }
        cluster.write_cliccfg(0b0000_0101); // nlbits=2
        for i in 0..2 {
            assert_eq!(0x7F, cluster.hart(i).clic_sel().level);
        }
    }

    #[test]
    fn test_reset_signal_resets_cliccfg() {
        let mut cluster = cluster(1);
        cluster.write_cliccfg(0b0000_1001);
        assert_eq!(4, cluster.cliccfg().nlbits());

        cluster.set_reset(0, true);
        cluster.set_reset(0, false);
        assert_eq!(0, cluster.cliccfg().nlbits());
        // nvbits is read-only and survives.
        assert!(cluster.cliccfg().nvbits());
    }
}
