/*
 * ELF Loader
 *
 * Instantiates a user process from an ELF32 executable in the block-file
 * store. The loader is deliberately small:
 *
 * - Executable objects only (type EXEC); no relocation, no dynamic
 *   sections. The image is assumed position-independent or linked for a
 *   fixed base, and the entry value is an offset applied to the loaded
 *   text.
 * - Exactly one executable segment and at most one writable segment.
 *   A load segment that is neither is rejected.
 * - Each segment gets `memsz` bytes from the kernel heap; `filesz` bytes
 *   come from the file and the remainder (BSS) is zero-filled.
 *
 * On success the images are handed to `add_process`, which owns them
 * until the process's last thread dies. Every failure path frees
 * whatever was already allocated.
 */

use bitflags::bitflags;
use core::fmt;
use core::mem::size_of;
use core::ptr::null_mut;

use super::{BlockFile, FileError};
use crate::heap;
use crate::sched::{self, process::PROCESS_STACK_BYTES};

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// ELF class (32-bit)
const ELFCLASS32: u8 = 1;

/// ELF type: executable file
const ET_EXEC: u16 = 2;

/// Program header type: loadable segment
const PT_LOAD: u32 = 1;

bitflags! {
    /// Program-header `p_flags` bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct SegmentFlags: u32 {
        const EXEC  = 0x1;
        const WRITE = 0x2;
        const READ  = 0x4;
    }
}

/// ELF32 file header (52 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct ElfHeader {
    e_ident: [u8; 16],
    e_type: u16,
    e_machine: u16,
    e_version: u32,
    e_entry: u32,
    e_phoff: u32,
    e_shoff: u32,
    e_flags: u32,
    e_ehsize: u16,
    e_phentsize: u16,
    e_phnum: u16,
    e_shentsize: u16,
    e_shnum: u16,
    e_shstrndx: u16,
}

/// ELF32 program header (32 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct ProgramHeader {
    p_type: u32,
    p_offset: u32,
    p_vaddr: u32,
    p_paddr: u32,
    p_filesz: u32,
    p_memsz: u32,
    p_flags: u32,
    p_align: u32,
}

/// Reasons an ELF image is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    BadMagic,
    NotClass32,
    NotExecutable,
    Truncated,
    MultipleWritable,
    MultipleExecutable,
    UnclassifiedSegment,
    NoEntry,
    OutOfMemory,
    ProcessTable,
    Io,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElfError::BadMagic => write!(f, "bad ELF magic"),
            ElfError::NotClass32 => write!(f, "not a 32-bit ELF"),
            ElfError::NotExecutable => write!(f, "not of type EXEC"),
            ElfError::Truncated => write!(f, "file truncated"),
            ElfError::MultipleWritable => write!(f, "multiple writable segments"),
            ElfError::MultipleExecutable => write!(f, "multiple executable segments"),
            ElfError::UnclassifiedSegment => write!(f, "segment neither writable nor executable"),
            ElfError::NoEntry => write!(f, "no entry point defined"),
            ElfError::OutOfMemory => write!(f, "segment allocation failed"),
            ElfError::ProcessTable => write!(f, "no free process slot"),
            ElfError::Io => write!(f, "file I/O failed"),
        }
    }
}

impl From<FileError> for ElfError {
    fn from(_: FileError) -> Self {
        ElfError::Io
    }
}

fn read_exact(file: &mut dyn BlockFile, buf: &mut [u8]) -> Result<(), ElfError> {
    if file.read(buf)? != buf.len() {
        return Err(ElfError::Truncated);
    }
    Ok(())
}

fn read_header(file: &mut dyn BlockFile) -> Result<ElfHeader, ElfError> {
    let mut raw = [0u8; size_of::<ElfHeader>()];
    file.seek(0)?;
    read_exact(file, &mut raw)?;
    let header = unsafe { core::ptr::read_unaligned(raw.as_ptr() as *const ElfHeader) };

    if header.e_ident[0..4] != ELF_MAGIC {
        return Err(ElfError::BadMagic);
    }
    if header.e_ident[4] != ELFCLASS32 {
        return Err(ElfError::NotClass32);
    }
    if header.e_type != ET_EXEC {
        return Err(ElfError::NotExecutable);
    }
    Ok(header)
}

fn read_program_header(
    file: &mut dyn BlockFile,
    header: &ElfHeader,
    n: u16,
) -> Result<ProgramHeader, ElfError> {
    let mut raw = [0u8; size_of::<ProgramHeader>()];
    file.seek(header.e_phoff + n as u32 * header.e_phentsize as u32)?;
    read_exact(file, &mut raw)?;
    Ok(unsafe { core::ptr::read_unaligned(raw.as_ptr() as *const ProgramHeader) })
}

/// Bring one load segment into a fresh heap image: `memsz` allocated,
/// `filesz` read, the tail zeroed.
fn load_segment(file: &mut dyn BlockFile, ph: &ProgramHeader) -> Result<*mut u8, ElfError> {
    if ph.p_memsz == 0 {
        log::debug!("elf: empty segment, nothing to load");
        return Ok(null_mut());
    }
    let image = heap::malloc(ph.p_memsz as usize);
    if image.is_null() {
        return Err(ElfError::OutOfMemory);
    }
    let result = (|| {
        file.seek(ph.p_offset)?;
        let body = unsafe { core::slice::from_raw_parts_mut(image, ph.p_filesz as usize) };
        read_exact(file, body)?;
        if ph.p_memsz > ph.p_filesz {
            unsafe {
                image
                    .add(ph.p_filesz as usize)
                    .write_bytes(0, (ph.p_memsz - ph.p_filesz) as usize)
            };
        }
        Ok(image)
    })();
    if result.is_err() {
        heap::free(image);
    }
    result
}

/// Load an open ELF executable and start it as a new process.
pub fn exec_elf(file: &mut dyn BlockFile) -> Result<(), ElfError> {
    let header = read_header(file)?;

    let mut text: *mut u8 = null_mut();
    let mut data: *mut u8 = null_mut();
    let mut seen_text = false;
    let mut seen_data = false;

    let result = (|| {
        for n in 0..header.e_phnum {
            let ph = read_program_header(file, &header, n)?;
            if ph.p_type != PT_LOAD {
                log::debug!("elf: skipping segment {} (type {})", n, ph.p_type);
                continue;
            }
            let flags = SegmentFlags::from_bits_truncate(ph.p_flags);
            if flags.contains(SegmentFlags::WRITE) {
                if seen_data {
                    return Err(ElfError::MultipleWritable);
                }
                seen_data = true;
                data = load_segment(file, &ph)?;
            } else if flags.contains(SegmentFlags::EXEC) {
                if seen_text {
                    return Err(ElfError::MultipleExecutable);
                }
                seen_text = true;
                text = load_segment(file, &ph)?;
            } else {
                return Err(ElfError::UnclassifiedSegment);
            }
        }
        if header.e_entry == 0 || text.is_null() {
            return Err(ElfError::NoEntry);
        }

        // The entry value is an offset into the loaded text image.
        let entry: fn() = unsafe {
            core::mem::transmute(text.add(header.e_entry as usize) as usize)
        };
        if !sched::add_process(entry, text, data, PROCESS_STACK_BYTES, 0) {
            return Err(ElfError::ProcessTable);
        }
        log::info!("elf: process started at entry offset {:#x}", header.e_entry);
        Ok(())
    })();

    if result.is_err() {
        heap::free(text);
        heap::free(data);
    }
    result
}

/// `exec_elf` with the diagnostic logged and folded to a flag, for
/// callers that only branch on success.
pub fn exec(file: &mut dyn BlockFile) -> bool {
    match exec_elf(file) {
        Ok(()) => true,
        Err(e) => {
            log::error!("ELF ERROR: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::{process_count, MAX_PROCESSES};
    use crate::test_support::{self, MemFile};

    // Minimal ELF32 image builder: header + program headers + segment
    // bytes appended at their stated offsets.
    struct Image {
        bytes: Vec<u8>,
        phnum: u16,
    }

    const EHSIZE: usize = size_of::<ElfHeader>();
    const PHSIZE: usize = size_of::<ProgramHeader>();

    impl Image {
        fn new(entry: u32, phnum: u16) -> Self {
            let mut bytes = vec![0u8; EHSIZE + phnum as usize * PHSIZE];
            bytes[0..4].copy_from_slice(&ELF_MAGIC);
            bytes[4] = ELFCLASS32;
            bytes[5] = 1; // little-endian
            bytes[6] = 1; // current version
            put16(&mut bytes, 16, ET_EXEC);
            put16(&mut bytes, 18, 40); // EM_ARM
            put32(&mut bytes, 24, entry);
            put32(&mut bytes, 28, EHSIZE as u32); // e_phoff
            put16(&mut bytes, 42, PHSIZE as u16); // e_phentsize
            put16(&mut bytes, 44, phnum);
            Self { bytes, phnum: 0 }
        }

        fn segment(mut self, flags: u32, payload: &[u8], memsz: u32) -> Self {
            let offset = self.bytes.len() as u32;
            let ph = EHSIZE + self.phnum as usize * PHSIZE;
            put32(&mut self.bytes, ph, PT_LOAD);
            put32(&mut self.bytes, ph + 4, offset);
            put32(&mut self.bytes, ph + 16, payload.len() as u32); // p_filesz
            put32(&mut self.bytes, ph + 20, memsz);
            put32(&mut self.bytes, ph + 24, flags);
            self.bytes.extend_from_slice(payload);
            self.phnum += 1;
            self
        }

        fn file(self) -> MemFile {
            MemFile::new(self.bytes)
        }
    }

    fn put16(b: &mut [u8], at: usize, v: u16) {
        b[at..at + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn put32(b: &mut [u8], at: usize, v: u32) {
        b[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    const X: u32 = 0x1;
    const W: u32 = 0x2;
    const R: u32 = 0x4;

    fn text_payload() -> Vec<u8> {
        vec![0x70, 0x47, 0x00, 0xBF] // bx lr; nop
    }

    #[test]
    fn well_formed_image_becomes_a_process() {
        let _guard = test_support::fresh_kernel();
        let space_before = crate::heap::space();

        let mut f = Image::new(1, 2)
            .segment(R | X, &text_payload(), 4)
            .segment(R | W, &[1, 2, 3, 4], 16)
            .file();
        assert_eq!(exec_elf(&mut f), Ok(()));
        assert_eq!(process_count(), 1);

        // the entry thread holds the only reference; killing it releases
        // text, data and stack back to the heap
        test_support::run_as_entry_thread_and_kill();
        assert_eq!(process_count(), 0);
        assert_eq!(crate::heap::space(), space_before);
    }

    #[test]
    fn bss_tail_is_zero_filled() {
        let _guard = test_support::fresh_kernel();
        let mut f = Image::new(1, 1).segment(R | X, &text_payload(), 64).file();
        assert_eq!(exec_elf(&mut f), Ok(()));
        let text = crate::sched::KERNEL.with(|k| k.processes[0].text);
        for i in 4..64 {
            assert_eq!(unsafe { *text.add(i) }, 0, "byte {} not zeroed", i);
        }
        test_support::run_as_entry_thread_and_kill();
    }

    #[test]
    fn rejection_matrix() {
        let _guard = test_support::fresh_kernel();
        let space_before = crate::heap::space();

        let mut bad_magic = Image::new(1, 0).file();
        bad_magic.corrupt(0, 0x00);
        assert_eq!(exec_elf(&mut bad_magic), Err(ElfError::BadMagic));

        let mut class64 = Image::new(1, 0).file();
        class64.corrupt(4, 2);
        assert_eq!(exec_elf(&mut class64), Err(ElfError::NotClass32));

        let mut reloc = Image::new(1, 0).file();
        reloc.corrupt(16, 1); // ET_REL
        assert_eq!(exec_elf(&mut reloc), Err(ElfError::NotExecutable));

        let mut two_x = Image::new(1, 2)
            .segment(R | X, &text_payload(), 4)
            .segment(R | X, &text_payload(), 4)
            .file();
        assert_eq!(exec_elf(&mut two_x), Err(ElfError::MultipleExecutable));

        let mut two_w = Image::new(1, 3)
            .segment(R | X, &text_payload(), 4)
            .segment(R | W, &[0; 4], 4)
            .segment(R | W, &[0; 4], 4)
            .file();
        assert_eq!(exec_elf(&mut two_w), Err(ElfError::MultipleWritable));

        let mut ro_only = Image::new(1, 1).segment(R, &[0; 4], 4).file();
        assert_eq!(exec_elf(&mut ro_only), Err(ElfError::UnclassifiedSegment));

        let mut no_text = Image::new(1, 1).segment(R | W, &[0; 4], 4).file();
        assert_eq!(exec_elf(&mut no_text), Err(ElfError::NoEntry));

        let mut truncated = Image::new(1, 1).segment(R | X, &text_payload(), 4).file();
        truncated.truncate(EHSIZE + PHSIZE + 2);
        assert_eq!(exec_elf(&mut truncated), Err(ElfError::Truncated));

        let mut huge = Image::new(1, 1)
            .segment(R | X, &text_payload(), 10 * 1024 * 1024)
            .file();
        assert_eq!(exec_elf(&mut huge), Err(ElfError::OutOfMemory));

        let mut empty = MemFile::new(vec![0x7F]);
        assert_eq!(exec_elf(&mut empty), Err(ElfError::Truncated));

        // every rejection unwound its allocations
        assert_eq!(crate::heap::space(), space_before);
        assert_eq!(process_count(), 0);
    }

    #[test]
    fn process_table_exhaustion_frees_the_images() {
        let _guard = test_support::fresh_kernel();
        for _ in 0..MAX_PROCESSES {
            let mut f = Image::new(1, 1).segment(R | X, &text_payload(), 4).file();
            assert_eq!(exec_elf(&mut f), Ok(()));
        }
        let space_full = crate::heap::space();
        let mut f = Image::new(1, 1).segment(R | X, &text_payload(), 4).file();
        assert_eq!(exec_elf(&mut f), Err(ElfError::ProcessTable));
        assert_eq!(crate::heap::space(), space_full);
    }

    #[test]
    fn exec_wrapper_folds_to_bool() {
        let _guard = test_support::fresh_kernel();
        let mut bad = MemFile::new(vec![0u8; 8]);
        assert!(!exec(&mut bad));
        let mut good = Image::new(1, 1).segment(R | X, &text_payload(), 4).file();
        assert!(exec(&mut good));
        test_support::run_as_entry_thread_and_kill();
    }
}
