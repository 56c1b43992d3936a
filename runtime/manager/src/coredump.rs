//! ELF core dump generation
//!
//! Produces an `ET_CORE` ELF that gdb and crash-analysis tooling accept as
//! an AArch64 core file: a PT_NOTE segment carrying NT_PRPSINFO,
//! NT_PRSTATUS (with the frozen register snapshot) and NT_FPREGSET,
//! followed by one page-aligned PT_LOAD covering the payload region. The
//! whole image is assembled in memory and written via a temporary sibling
//! plus rename, so a partially written dump never appears under the final
//! name.

use std::fs;
use std::path::Path;

use domctl_protocol::{Aarch64FpRegs, Aarch64Regs};

use crate::Result;

const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const EV_CURRENT: u8 = 1;
const ET_CORE: u16 = 4;
const EM_AARCH64: u16 = 183;

const PT_LOAD: u32 = 1;
const PT_NOTE: u32 = 4;
const PF_R: u32 = 4;
const PF_W: u32 = 2;
const PF_X: u32 = 1;

const NT_PRSTATUS: u32 = 1;
const NT_FPREGSET: u32 = 2;
const NT_PRPSINFO: u32 = 3;

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;
const PAGE: usize = 0x1000;

/// Sizes fixed by the kernel ABI; debuggers reject notes of other sizes.
const PRSTATUS_SIZE: usize = 392;
const PRSTATUS_REG_OFFSET: usize = 112;
const PRPSINFO_SIZE: usize = 136;
const FPREGSET_SIZE: usize = 528;

/// Write a core dump of one crashed payload.
///
/// `memory` is the payload region contents, loaded at `load_address` in
/// the payload's address space.
pub fn write_core_dump(
    path: &Path,
    regs: &Aarch64Regs,
    fpregs: &Aarch64FpRegs,
    load_address: u64,
    memory: &[u8],
) -> Result<()> {
    let notes = build_notes(regs, fpregs);

    let note_offset = EHDR_SIZE + 2 * PHDR_SIZE;
    let load_offset = (note_offset + notes.len()).next_multiple_of(PAGE);

    let mut out = Vec::with_capacity(load_offset + memory.len());
    push_ehdr(&mut out);
    push_phdr(
        &mut out,
        PT_NOTE,
        0,
        note_offset as u64,
        0,
        notes.len() as u64,
        0,
    );
    push_phdr(
        &mut out,
        PT_LOAD,
        PF_R | PF_W | PF_X,
        load_offset as u64,
        load_address,
        memory.len() as u64,
        PAGE as u64,
    );
    out.extend_from_slice(&notes);
    out.resize(load_offset, 0);
    out.extend_from_slice(memory);

    // Temporary sibling first; the rename is atomic on the same filesystem.
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &out)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn push_ehdr(out: &mut Vec<u8>) {
    out.extend_from_slice(&[0x7F, b'E', b'L', b'F']);
    out.extend_from_slice(&[ELFCLASS64, ELFDATA2LSB, EV_CURRENT, 0]);
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&ET_CORE.to_le_bytes());
    out.extend_from_slice(&EM_AARCH64.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes()); // e_version
    out.extend_from_slice(&0u64.to_le_bytes()); // e_entry
    out.extend_from_slice(&(EHDR_SIZE as u64).to_le_bytes()); // e_phoff
    out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes()); // e_phnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
}

#[allow(clippy::too_many_arguments)]
fn push_phdr(
    out: &mut Vec<u8>,
    p_type: u32,
    flags: u32,
    offset: u64,
    vaddr: u64,
    size: u64,
    align: u64,
) {
    out.extend_from_slice(&p_type.to_le_bytes());
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(&vaddr.to_le_bytes());
    out.extend_from_slice(&vaddr.to_le_bytes()); // p_paddr
    out.extend_from_slice(&size.to_le_bytes()); // p_filesz
    out.extend_from_slice(&size.to_le_bytes()); // p_memsz
    out.extend_from_slice(&align.to_le_bytes());
}

fn push_note(out: &mut Vec<u8>, note_type: u32, desc: &[u8]) {
    const NAME: &[u8] = b"CORE\0";
    out.extend_from_slice(&(NAME.len() as u32).to_le_bytes());
    out.extend_from_slice(&(desc.len() as u32).to_le_bytes());
    out.extend_from_slice(&note_type.to_le_bytes());
    out.extend_from_slice(NAME);
    out.resize(out.len().next_multiple_of(4), 0);
    out.extend_from_slice(desc);
    out.resize(out.len().next_multiple_of(4), 0);
}

fn build_notes(regs: &Aarch64Regs, fpregs: &Aarch64FpRegs) -> Vec<u8> {
    let mut notes = Vec::new();
    push_note(&mut notes, NT_PRPSINFO, &build_prpsinfo());
    push_note(&mut notes, NT_PRSTATUS, &build_prstatus(regs));
    push_note(&mut notes, NT_FPREGSET, &fpregs_bytes(fpregs));
    notes
}

/// Minimal prpsinfo: the process name is the only field debuggers show.
fn build_prpsinfo() -> [u8; PRPSINFO_SIZE] {
    let mut info = [0u8; PRPSINFO_SIZE];
    info[0] = b'R'; // pr_state
    info[1] = b'R'; // pr_sname

    const NAME: &[u8] = b"payload";
    // pr_fname at offset 40, pr_psargs right after.
    info[40..40 + NAME.len()].copy_from_slice(NAME);
    info[56..56 + NAME.len()].copy_from_slice(NAME);
    info
}

fn build_prstatus(regs: &Aarch64Regs) -> [u8; PRSTATUS_SIZE] {
    let mut status = [0u8; PRSTATUS_SIZE];

    // pr_info.si_signo / pr_cursig: present the crash as a SIGSEGV.
    const SIGSEGV: u32 = 11;
    status[0..4].copy_from_slice(&SIGSEGV.to_le_bytes());
    status[12..14].copy_from_slice(&(SIGSEGV as u16).to_le_bytes());

    status[PRSTATUS_REG_OFFSET..PRSTATUS_REG_OFFSET + core::mem::size_of::<Aarch64Regs>()]
        .copy_from_slice(&regs_bytes(regs));

    // pr_fpvalid
    let fpvalid_offset = PRSTATUS_REG_OFFSET + core::mem::size_of::<Aarch64Regs>();
    status[fpvalid_offset..fpvalid_offset + 4].copy_from_slice(&1u32.to_le_bytes());
    status
}

fn regs_bytes(regs: &Aarch64Regs) -> [u8; 272] {
    // repr(C) with no interior padding; the layout is the kernel's
    // user_regs_struct by construction.
    unsafe { core::mem::transmute_copy(regs) }
}

fn fpregs_bytes(fpregs: &Aarch64FpRegs) -> [u8; FPREGSET_SIZE] {
    unsafe { core::mem::transmute_copy(fpregs) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn read_u64(bytes: &[u8], offset: usize) -> u64 {
        u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
    }

    #[test]
    fn dump_is_a_wellformed_aarch64_core() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("payload.core");

        let mut regs = Aarch64Regs::zeroed();
        regs.pc = 0x7802_0040;
        regs.regs[5] = 0x5555;

        let memory = vec![0xABu8; 2 * PAGE];
        write_core_dump(
            &path,
            &regs,
            &Aarch64FpRegs::zeroed(),
            0x7802_0000,
            &memory,
        )
        .unwrap();

        let dump = fs::read(&path).unwrap();
        assert_eq!(&dump[0..4], b"\x7FELF");
        assert_eq!(u16::from_le_bytes([dump[16], dump[17]]), ET_CORE);
        assert_eq!(u16::from_le_bytes([dump[18], dump[19]]), EM_AARCH64);
        // Two program headers.
        assert_eq!(u16::from_le_bytes([dump[56], dump[57]]), 2);

        // First phdr is the note segment.
        let phdr0 = EHDR_SIZE;
        assert_eq!(
            u32::from_le_bytes(dump[phdr0..phdr0 + 4].try_into().unwrap()),
            PT_NOTE
        );

        // Second phdr: page-aligned load of the payload region.
        let phdr1 = EHDR_SIZE + PHDR_SIZE;
        assert_eq!(
            u32::from_le_bytes(dump[phdr1..phdr1 + 4].try_into().unwrap()),
            PT_LOAD
        );
        let load_offset = read_u64(&dump, phdr1 + 8);
        assert_eq!(load_offset % PAGE as u64, 0);
        assert_eq!(read_u64(&dump, phdr1 + 16), 0x7802_0000);
        assert_eq!(read_u64(&dump, phdr1 + 32), memory.len() as u64);
        assert_eq!(dump[load_offset as usize], 0xAB);
    }

    #[test]
    fn prstatus_note_carries_the_registers() {
        let mut regs = Aarch64Regs::zeroed();
        regs.regs[0] = 0x1122_3344_5566_7788;
        regs.pc = 0x7802_1000;

        let status = build_prstatus(&regs);
        assert_eq!(
            read_u64(&status, PRSTATUS_REG_OFFSET),
            0x1122_3344_5566_7788
        );
        // pc sits after x0..x30 and sp.
        assert_eq!(read_u64(&status, PRSTATUS_REG_OFFSET + 32 * 8), 0x7802_1000);
        // pr_fpvalid set.
        assert_eq!(status[PRSTATUS_REG_OFFSET + 272], 1);
    }

    #[test]
    fn notes_are_word_aligned_and_kernel_sized() {
        let notes = build_notes(&Aarch64Regs::zeroed(), &Aarch64FpRegs::zeroed());

        let mut offset = 0;
        let mut seen = Vec::new();
        while offset < notes.len() {
            let namesz = u32::from_le_bytes(notes[offset..offset + 4].try_into().unwrap());
            let descsz = u32::from_le_bytes(notes[offset + 4..offset + 8].try_into().unwrap());
            let ntype = u32::from_le_bytes(notes[offset + 8..offset + 12].try_into().unwrap());
            seen.push((ntype, descsz as usize));
            assert_eq!(&notes[offset + 12..offset + 17], b"CORE\0");
            offset += 12;
            offset += (namesz as usize).next_multiple_of(4);
            offset += (descsz as usize).next_multiple_of(4);
        }

        assert_eq!(
            seen,
            vec![
                (NT_PRPSINFO, PRPSINFO_SIZE),
                (NT_PRSTATUS, PRSTATUS_SIZE),
                (NT_FPREGSET, FPREGSET_SIZE),
            ]
        );
    }

    #[test]
    fn failed_dump_leaves_no_file_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("payload.core");

        let result = write_core_dump(
            &path,
            &Aarch64Regs::zeroed(),
            &Aarch64FpRegs::zeroed(),
            0x7802_0000,
            &[0u8; 64],
        );
        assert!(result.is_err());
        assert!(!path.exists());
    }
}
