//! Emulated VideoCore mailbox, property channel only.
//!
//! Each guest gets its own mailbox, so two guests negotiating their
//! memory map at boot cannot see each other's requests. The guest
//! hands over the bus address of a property buffer in its own memory;
//! the buffer is edited in place through the guest's stage-2 tables
//! and the same word is handed back on the next read.
//!
//! `STATUS` alternates between ready and empty so the guest's two
//! polling loops (wait-not-full before write, wait-not-empty before
//! read) both make progress under the strictly synchronous emulation.

use hal::raspi3::{bus_to_phys, MBOX_READ, MBOX_STATUS, MBOX_WRITE};
use hal::Ipa;
use vmm::{AddressSpace, PagePool};

const MBOX_EMPTY: u32 = 0x4000_0000;
const RESPONSE_OK: u32 = 0x8000_0000;
const CHANNEL_MASK: u32 = 0xF;
const CHANNEL_PROPERTY: u32 = 8;

const TAG_END: u32 = 0;
const TAG_GET_BOARD_SERIAL: u32 = 0x0001_0004;
const TAG_GET_ARM_MEMORY: u32 = 0x0001_0005;
const TAG_SET_POWER_STATE: u32 = 0x0002_8001;

/// What the board reports as ARM-visible memory: everything below the
/// VideoCore split.
const ARM_MEMORY_BASE: u32 = 0;
const ARM_MEMORY_SIZE: u32 = 0x3C00_0000;

#[derive(Debug, Default)]
pub struct Mailbox {
    read_value: u32,
    report_empty: bool,
}

impl Mailbox {
    pub fn read(&mut self, addr: u64) -> u32 {
        match addr {
            MBOX_READ => self.read_value,
            MBOX_STATUS => {
                self.report_empty = !self.report_empty;
                if self.report_empty {
                    0
                } else {
                    MBOX_EMPTY
                }
            }
            _ => 0,
        }
    }

    pub fn write(&mut self, pool: &mut PagePool, space: &AddressSpace, addr: u64, value: u32) {
        if addr != MBOX_WRITE {
            return;
        }
        if value & CHANNEL_MASK == CHANNEL_PROPERTY {
            let buffer = Ipa::new(bus_to_phys((value & !CHANNEL_MASK) as u64));
            process_property_buffer(pool, space, buffer);
        }
        // The response readback carries the same word the guest wrote.
        self.read_value = value;
    }
}

fn process_property_buffer(pool: &PagePool, space: &AddressSpace, buffer: Ipa) {
    // A buffer pointer into unmapped guest memory leaves the request
    // unanswered; the guest's poll loop will spin on a stale response
    // rather than corrupt anything.
    let Some(size) = guest_read(pool, space, buffer) else {
        hal::warning!("mailbox buffer at {} is not mapped", buffer);
        return;
    };
    let mut off = 8u64;
    while off + 12 <= size as u64 {
        let Some(tag) = guest_read(pool, space, buffer + off) else {
            return;
        };
        if tag == TAG_END {
            break;
        }
        let Some(value_len) = guest_read(pool, space, buffer + off + 4) else {
            return;
        };
        let response_len = match tag {
            TAG_GET_ARM_MEMORY => {
                guest_write(pool, space, buffer + off + 12, ARM_MEMORY_BASE);
                guest_write(pool, space, buffer + off + 16, ARM_MEMORY_SIZE);
                8
            }
            TAG_GET_BOARD_SERIAL => {
                guest_write(pool, space, buffer + off + 12, 0);
                guest_write(pool, space, buffer + off + 16, 0);
                8
            }
            TAG_SET_POWER_STATE => {
                // Device id echoes back in place; report powered on
                // without waiting.
                guest_write(pool, space, buffer + off + 16, 1);
                8
            }
            _ => value_len,
        };
        guest_write(pool, space, buffer + off + 8, RESPONSE_OK | response_len);
        off += 12 + (value_len as u64 + 3) / 4 * 4;
    }
    guest_write(pool, space, buffer + 4, RESPONSE_OK);
}

fn guest_read(pool: &PagePool, space: &AddressSpace, ipa: Ipa) -> Option<u32> {
    let pa = space.translate(pool, ipa)?;
    Some(unsafe { (pool.virt(pa) as *const u32).read_unaligned() })
}

fn guest_write(pool: &PagePool, space: &AddressSpace, ipa: Ipa, value: u32) {
    if let Some(pa) = space.translate(pool, ipa) {
        unsafe { (pool.virt(pa) as *mut u32).write_unaligned(value) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hal::raspi3::phys_to_bus;
    use hal::Pa;
    use vmm::Stage2Flags as Flags;

    fn setup() -> (PagePool, AddressSpace, Ipa, Pa) {
        let mut pool = PagePool::with_arena(Pa::new(0x40_0000), 16);
        let mut space = AddressSpace::new(&mut pool).unwrap();
        let page = pool.allocate().unwrap();
        let buffer = Ipa::new(0x10_0000);
        space
            .map_page(&mut pool, buffer, page, Flags::NORMAL)
            .unwrap();
        (pool, space, buffer, page)
    }

    fn poke(pool: &PagePool, page: Pa, words: &[u32]) {
        for (i, &w) in words.iter().enumerate() {
            unsafe { (pool.virt(page) as *mut u32).add(i).write(w) };
        }
    }

    fn peek(pool: &PagePool, page: Pa, word: usize) -> u32 {
        unsafe { (pool.virt(page) as *const u32).add(word).read() }
    }

    #[test]
    fn status_alternates_so_polling_progresses() {
        let mut mbox = Mailbox::default();
        let a = mbox.read(MBOX_STATUS);
        let b = mbox.read(MBOX_STATUS);
        assert_ne!(a, b);
        assert!(a == 0 || a == 0x4000_0000);
    }

    #[test]
    fn arm_memory_tag_reports_the_videocore_split() {
        let (mut pool, space, buffer, page) = setup();
        let request = [
            8 * 4,
            0,
            TAG_GET_ARM_MEMORY,
            8,
            0,
            0xAAAA_AAAA,
            0xBBBB_BBBB,
            TAG_END,
        ];
        poke(&pool, page, &request);

        let mut mbox = Mailbox::default();
        let word = phys_to_bus(buffer.into_u64()) as u32 | CHANNEL_PROPERTY;
        mbox.write(&mut pool, &space, MBOX_WRITE, word);

        assert_eq!(peek(&pool, page, 1), RESPONSE_OK);
        assert_eq!(peek(&pool, page, 4), RESPONSE_OK | 8);
        assert_eq!(peek(&pool, page, 5), 0);
        assert_eq!(peek(&pool, page, 6), 0x3C00_0000);
        // The readback returns the word that was posted.
        assert_eq!(mbox.read(MBOX_READ), word);
    }

    #[test]
    fn power_state_reports_on() {
        let (mut pool, space, buffer, page) = setup();
        let request = [
            8 * 4,
            0,
            TAG_SET_POWER_STATE,
            8,
            0,
            0x3, // device id
            0x1, // requested state
            TAG_END,
        ];
        poke(&pool, page, &request);

        let mut mbox = Mailbox::default();
        mbox.write(
            &mut pool,
            &space,
            MBOX_WRITE,
            phys_to_bus(buffer.into_u64()) as u32 | CHANNEL_PROPERTY,
        );

        assert_eq!(peek(&pool, page, 5), 0x3);
        assert_eq!(peek(&pool, page, 6), 1);
    }

    #[test]
    fn several_tags_processed_in_one_buffer() {
        let (mut pool, space, buffer, page) = setup();
        let request = [
            14 * 4,
            0,
            TAG_GET_BOARD_SERIAL,
            8,
            0,
            0,
            0,
            TAG_GET_ARM_MEMORY,
            8,
            0,
            0,
            0,
            TAG_END,
            0,
        ];
        poke(&pool, page, &request);

        let mut mbox = Mailbox::default();
        mbox.write(
            &mut pool,
            &space,
            MBOX_WRITE,
            phys_to_bus(buffer.into_u64()) as u32 | CHANNEL_PROPERTY,
        );

        assert_eq!(peek(&pool, page, 4), RESPONSE_OK | 8);
        assert_eq!(peek(&pool, page, 9), RESPONSE_OK | 8);
        assert_eq!(peek(&pool, page, 11), 0x3C00_0000);
    }

    #[test]
    fn unmapped_buffer_is_ignored() {
        let (mut pool, space, _buffer, _page) = setup();
        let mut mbox = Mailbox::default();
        // Points at guest memory that was never mapped.
        mbox.write(
            &mut pool,
            &space,
            MBOX_WRITE,
            phys_to_bus(0x2000_0000) as u32 | CHANNEL_PROPERTY,
        );
        assert_eq!(mbox.read(MBOX_READ) & !CHANNEL_MASK, 0xE000_0000);
    }
}
