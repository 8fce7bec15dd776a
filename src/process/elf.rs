//! ELF32 validation and `PT_LOAD` segment enumeration. Ground:
//! `SPEC_FULL.md` §4.6, `original_source/kernel/process/elf.c`.

extern crate alloc;

use crate::error::{KernelError, KernelResult};

const EI_MAG0: usize = 0;
const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const EI_CLASS: usize = 4;
const ELFCLASS32: u8 = 1;
const EI_DATA: usize = 5;
const ELFDATA2LSB: u8 = 1;
const E_MACHINE_386: u16 = 3;
const ET_EXEC: u16 = 2;
const ET_DYN: u16 = 3;

const PT_LOAD: u32 = 1;
const SHT_INIT_ARRAY: u32 = 14;
const SHT_FINI_ARRAY: u32 = 15;
const SHT_PREINIT_ARRAY: u32 = 16;

pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;
pub const PF_R: u32 = 4;

#[repr(C)]
#[derive(Clone, Copy)]
struct Elf32Header {
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

#[repr(C)]
#[derive(Clone, Copy)]
struct Elf32ProgramHeader {
    p_type: u32,
    p_offset: u32,
    p_vaddr: u32,
    p_paddr: u32,
    p_filesz: u32,
    p_memsz: u32,
    p_flags: u32,
    p_align: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Elf32SectionHeader {
    sh_name: u32,
    sh_type: u32,
    sh_flags: u32,
    sh_addr: u32,
    sh_offset: u32,
    sh_size: u32,
    sh_link: u32,
    sh_info: u32,
    sh_addralign: u32,
    sh_entsize: u32,
}

/// One `PT_LOAD` segment to be mapped into a new address space.
#[derive(Debug, Clone, Copy)]
pub struct LoadSegment {
    pub vaddr: u32,
    pub file_offset: u32,
    pub file_size: u32,
    pub mem_size: u32,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
}

/// Virtual address and element count of a constructor/destructor array
/// section, recorded so the kernel can invoke them at process start/exit.
#[derive(Debug, Clone, Copy)]
pub struct InitFiniArray {
    pub vaddr: u32,
    pub size: u32,
}

/// A validated ELF32 image ready for loading.
#[derive(Debug, Clone, Copy)]
pub struct ElfImage<'a> {
    data: &'a [u8],
    pub entry: u32,
}

fn read_u16(data: &[u8], offset: usize) -> KernelResult<u16> {
    let bytes: [u8; 2] = data
        .get(offset..offset + 2)
        .ok_or(KernelError::InvalidArgument)?
        .try_into()
        .map_err(|_| KernelError::InvalidArgument)?;
    Ok(u16::from_le_bytes(bytes))
}

fn read_u32(data: &[u8], offset: usize) -> KernelResult<u32> {
    let bytes: [u8; 4] = data
        .get(offset..offset + 4)
        .ok_or(KernelError::InvalidArgument)?
        .try_into()
        .map_err(|_| KernelError::InvalidArgument)?;
    Ok(u32::from_le_bytes(bytes))
}

fn header(data: &[u8]) -> KernelResult<Elf32Header> {
    if data.len() < core::mem::size_of::<Elf32Header>() {
        return Err(KernelError::InvalidArgument);
    }
    if data[EI_MAG0..EI_MAG0 + 4] != ELF_MAGIC {
        return Err(KernelError::InvalidArgument);
    }
    if data[EI_CLASS] != ELFCLASS32 || data[EI_DATA] != ELFDATA2LSB {
        return Err(KernelError::InvalidArgument);
    }
    let e_type = read_u16(data, 16)?;
    let e_machine = read_u16(data, 18)?;
    if e_machine != E_MACHINE_386 || (e_type != ET_EXEC && e_type != ET_DYN) {
        return Err(KernelError::InvalidArgument);
    }
    let mut ident = [0u8; 16];
    ident.copy_from_slice(&data[0..16]);
    Ok(Elf32Header {
        e_ident: ident,
        e_type,
        e_machine,
        e_version: read_u32(data, 20)?,
        e_entry: read_u32(data, 24)?,
        e_phoff: read_u32(data, 28)?,
        e_shoff: read_u32(data, 32)?,
        e_flags: read_u32(data, 36)?,
        e_ehsize: read_u16(data, 40)?,
        e_phentsize: read_u16(data, 42)?,
        e_phnum: read_u16(data, 44)?,
        e_shentsize: read_u16(data, 46)?,
        e_shnum: read_u16(data, 48)?,
        e_shstrndx: read_u16(data, 50)?,
    })
}

impl<'a> ElfImage<'a> {
    /// Validates `data` as a 32-bit little-endian ELF for this machine,
    /// rejecting any magic/class/data/machine mismatch.
    pub fn parse(data: &'a [u8]) -> KernelResult<Self> {
        let hdr = header(data)?;
        Ok(Self { data, entry: hdr.e_entry })
    }

    fn program_header(&self, index: u16) -> KernelResult<Elf32ProgramHeader> {
        let hdr = header(self.data)?;
        let offset = hdr.e_phoff as usize + index as usize * hdr.e_phentsize as usize;
        Ok(Elf32ProgramHeader {
            p_type: read_u32(self.data, offset)?,
            p_offset: read_u32(self.data, offset + 4)?,
            p_vaddr: read_u32(self.data, offset + 8)?,
            p_paddr: read_u32(self.data, offset + 12)?,
            p_filesz: read_u32(self.data, offset + 16)?,
            p_memsz: read_u32(self.data, offset + 20)?,
            p_flags: read_u32(self.data, offset + 24)?,
            p_align: read_u32(self.data, offset + 28)?,
        })
    }

    /// Iterates every `PT_LOAD` segment this image declares.
    pub fn load_segments(&self) -> KernelResult<alloc::vec::Vec<LoadSegment>> {
        let hdr = header(self.data)?;
        let mut segments = alloc::vec::Vec::new();
        for i in 0..hdr.e_phnum {
            let ph = self.program_header(i)?;
            if ph.p_type != PT_LOAD {
                continue;
            }
            segments.push(LoadSegment {
                vaddr: ph.p_vaddr,
                file_offset: ph.p_offset,
                file_size: ph.p_filesz,
                mem_size: ph.p_memsz,
                readable: ph.p_flags & PF_R != 0,
                writable: ph.p_flags & PF_W != 0,
                executable: ph.p_flags & PF_X != 0,
            });
        }
        Ok(segments)
    }

    /// The raw file bytes backing a load segment's `p_filesz` prefix.
    pub fn segment_file_bytes(&self, segment: &LoadSegment) -> KernelResult<&'a [u8]> {
        let start = segment.file_offset as usize;
        let end = start + segment.file_size as usize;
        self.data.get(start..end).ok_or(KernelError::InvalidArgument)
    }

    fn section_header(&self, index: u16, hdr: &Elf32Header) -> KernelResult<Elf32SectionHeader> {
        let offset = hdr.e_shoff as usize + index as usize * hdr.e_shentsize as usize;
        Ok(Elf32SectionHeader {
            sh_name: read_u32(self.data, offset)?,
            sh_type: read_u32(self.data, offset + 4)?,
            sh_flags: read_u32(self.data, offset + 8)?,
            sh_addr: read_u32(self.data, offset + 12)?,
            sh_offset: read_u32(self.data, offset + 16)?,
            sh_size: read_u32(self.data, offset + 20)?,
            sh_link: read_u32(self.data, offset + 24)?,
            sh_info: read_u32(self.data, offset + 28)?,
            sh_addralign: read_u32(self.data, offset + 32)?,
            sh_entsize: read_u32(self.data, offset + 36)?,
        })
    }

    /// Locates the `.init_array`/`.fini_array`/`.preinit_array` sections,
    /// if present, so constructors/destructors can be invoked around the
    /// process's lifetime.
    pub fn init_fini_arrays(&self) -> KernelResult<(Option<InitFiniArray>, Option<InitFiniArray>, Option<InitFiniArray>)> {
        let hdr = header(self.data)?;
        let mut init = None;
        let mut fini = None;
        let mut preinit = None;
        for i in 0..hdr.e_shnum {
            let sh = self.section_header(i, &hdr)?;
            let array = InitFiniArray { vaddr: sh.sh_addr, size: sh.sh_size };
            match sh.sh_type {
                SHT_INIT_ARRAY => init = Some(array),
                SHT_FINI_ARRAY => fini = Some(array),
                SHT_PREINIT_ARRAY => preinit = Some(array),
                _ => {}
            }
        }
        Ok((init, fini, preinit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_elf() -> alloc::vec::Vec<u8> {
        let mut data = alloc::vec![0u8; 52 + 32];
        data[0..4].copy_from_slice(&ELF_MAGIC);
        data[EI_CLASS] = ELFCLASS32;
        data[EI_DATA] = ELFDATA2LSB;
        data[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        data[18..20].copy_from_slice(&E_MACHINE_386.to_le_bytes());
        data[24..28].copy_from_slice(&0x1000u32.to_le_bytes()); // e_entry
        data[28..32].copy_from_slice(&52u32.to_le_bytes()); // e_phoff
        data[42..44].copy_from_slice(&32u16.to_le_bytes()); // e_phentsize
        data[44..46].copy_from_slice(&1u16.to_le_bytes()); // e_phnum

        let ph = &mut data[52..52 + 32];
        ph[0..4].copy_from_slice(&PT_LOAD.to_le_bytes());
        ph[8..12].copy_from_slice(&0x1000u32.to_le_bytes()); // p_vaddr
        ph[16..20].copy_from_slice(&4u32.to_le_bytes()); // p_filesz
        ph[20..24].copy_from_slice(&8u32.to_le_bytes()); // p_memsz
        ph[24..28].copy_from_slice(&(PF_R | PF_X).to_le_bytes());
        data
    }

    #[test_case]
    fn rejects_bad_magic() {
        let mut data = minimal_elf();
        data[0] = 0;
        assert!(ElfImage::parse(&data).is_err());
    }

    #[test_case]
    fn rejects_wrong_machine() {
        let mut data = minimal_elf();
        data[18..20].copy_from_slice(&62u16.to_le_bytes()); // EM_X86_64
        assert!(ElfImage::parse(&data).is_err());
    }

    #[test_case]
    fn accepts_and_enumerates_load_segments() {
        let data = minimal_elf();
        let image = ElfImage::parse(&data).unwrap();
        assert_eq!(image.entry, 0x1000);
        let segments = image.load_segments().unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].vaddr, 0x1000);
        assert_eq!(segments[0].mem_size, 8);
        assert!(segments[0].readable);
        assert!(segments[0].executable);
        assert!(!segments[0].writable);
    }
}
