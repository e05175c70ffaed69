//! PSI section reassembly across transport packets

use tracing::trace;

/// Upper bound on a section, header included (private sections may use
/// the full 12-bit length).
pub const MAX_SECTION_SIZE: usize = 4096;

const CRC32_TABLE: [u32; 256] = build_crc32_table();

const fn build_crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04C1_1DB7
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// CRC-32/MPEG-2 (polynomial 0x04C11DB7, initial 0xFFFFFFFF, no reflection).
///
/// Running it over a whole section including its CRC field yields 0.
pub fn crc32_mpeg2(data: &[u8]) -> u32 {
    data.iter().fold(0xFFFF_FFFF, |crc, &byte| {
        (crc << 8) ^ CRC32_TABLE[((crc >> 24) as u8 ^ byte) as usize]
    })
}

/// Reassembles sections for one PID.
///
/// A section starts at the pointer field of a payload-start packet and
/// continues until its declared `section_length` is satisfied. Several
/// sections may be packed into one packet; 0xFF stuffing ends the packet.
#[derive(Debug, Default)]
pub struct SectionAssembler {
    buffer: Vec<u8>,
    active: bool,
    last_cc: Option<u8>,
}

impl SectionAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any partial section.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.active = false;
        self.last_cc = None;
    }

    /// Feed one packet payload. Returns the sections completed by it.
    pub fn push(&mut self, payload: &[u8], payload_start: bool, cc: u8) -> Vec<Vec<u8>> {
        let mut sections = Vec::new();
        let continuity_ok = match self.last_cc {
            Some(last) if cc == last => {
                // duplicate packet
                return sections;
            }
            Some(last) => cc == (last + 1) & 0x0F,
            None => true,
        };
        self.last_cc = Some(cc);

        if payload_start {
            let Some((&pointer, rest)) = payload.split_first() else {
                return sections;
            };
            let pointer = pointer as usize;
            if pointer > rest.len() {
                trace!(pointer, "pointer field past end of packet");
                self.buffer.clear();
                self.active = false;
                return sections;
            }
            if self.active && continuity_ok {
                self.buffer.extend_from_slice(&rest[..pointer]);
                self.drain_complete(&mut sections);
            }
            self.buffer.clear();
            self.buffer.extend_from_slice(&rest[pointer..]);
            self.active = true;
            self.drain_complete(&mut sections);
        } else if self.active {
            if !continuity_ok {
                trace!(cc, "continuity error, dropping partial section");
                self.buffer.clear();
                self.active = false;
                return sections;
            }
            self.buffer.extend_from_slice(payload);
            self.drain_complete(&mut sections);
        }
        sections
    }

    fn drain_complete(&mut self, sections: &mut Vec<Vec<u8>>) {
        while self.active && self.buffer.len() >= 3 {
            if self.buffer[0] == 0xFF {
                self.buffer.clear();
                self.active = false;
                return;
            }
            let length = 3 + ((usize::from(self.buffer[1] & 0x0F) << 8) | usize::from(self.buffer[2]));
            if length > MAX_SECTION_SIZE {
                self.buffer.clear();
                self.active = false;
                return;
            }
            if self.buffer.len() < length {
                return;
            }
            let rest = self.buffer.split_off(length);
            sections.push(std::mem::replace(&mut self.buffer, rest));
        }
        if self.buffer.is_empty() {
            self.active = false;
        }
    }
}
