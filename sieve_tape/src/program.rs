// Copyright 2026 the Sieve Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compiled programs, their builder, and the binary container format.
//!
//! A [`Program`] owns a main code block, any number of auxiliary blocks (one per extension that
//! asked for private storage), the per-program [`ExtensionTable`], and an optional line table
//! mapping code addresses back to script lines. Programs are immutable once built and may be
//! shared between threads behind an `Arc`.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::action::SideEffect;
use crate::block::{Address, Block, EmitError};
use crate::extension::{ExtIndex, Extension, ExtensionRegistry, ExtensionTable};
use crate::format::{DecodeError, Reader, Writer};
use crate::object::{ObjectClass, ObjectRef};
use crate::opcode::{BUILTIN_OPCODE_COUNT, CoreOp};
use crate::operation::OperationRef;

/// Container format major version.
pub const VERSION_MAJOR: u16 = 0;
/// Container format minor version.
pub const VERSION_MINOR: u16 = 1;

const MAGIC: &[u8; 8] = b"SIEVEBIN";

/// Identifies a block within a program.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    /// The main code block. Execution always starts at address 0 of this block.
    pub const MAIN: Self = Self(0);
}

/// Maps the code starting at `address` (up to the next entry) to a script line.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LineEntry {
    /// First main-block address covered by this entry.
    pub address: Address,
    /// Script line number.
    pub line: u32,
}

/// A decoded extension reference.
#[derive(Clone)]
pub enum ExtRef<'p> {
    /// The byte was below the baseline and names a core item directly.
    Core(u8),
    /// The byte named an entry of the program's extension table.
    Extension {
        /// Per-program index.
        index: ExtIndex,
        /// The extension itself.
        ext: &'p Arc<dyn Extension>,
    },
}

impl core::fmt::Debug for ExtRef<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Core(code) => f.debug_tuple("Core").field(code).finish(),
            Self::Extension { index, ext } => f
                .debug_struct("Extension")
                .field("index", index)
                .field("name", &ext.name())
                .finish(),
        }
    }
}

/// A compiled program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program {
    main: Block,
    blocks: Vec<Block>,
    extensions: ExtensionTable,
    lines: Vec<LineEntry>,
}

impl Program {
    /// The main code block.
    #[must_use]
    pub fn code(&self) -> &Block {
        &self.main
    }

    /// Size of the main code block.
    #[must_use]
    pub fn code_size(&self) -> usize {
        self.main.size()
    }

    /// Looks up a block by id.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        match id.0.checked_sub(1) {
            None => Some(&self.main),
            Some(i) => self.blocks.get(i as usize),
        }
    }

    /// Number of blocks, including the main block.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len() + 1
    }

    /// The program's extension table.
    #[must_use]
    pub fn extensions(&self) -> &ExtensionTable {
        &self.extensions
    }

    /// The private block of the extension at `index`, if it has one.
    #[must_use]
    pub fn extension_block(&self, index: ExtIndex) -> Option<&Block> {
        self.extensions.block(index).and_then(|id| self.block(id))
    }

    /// The line table, sorted by address.
    #[must_use]
    pub fn lines(&self) -> &[LineEntry] {
        &self.lines
    }

    /// Script line of the code at `address`, if the program carries line information for it.
    #[must_use]
    pub fn line_at(&self, address: Address) -> Option<u32> {
        let end = self.lines.partition_point(|e| e.address <= address);
        end.checked_sub(1).map(|i| self.lines[i].line)
    }

    /// Reads an extension byte relative to `baseline`.
    ///
    /// On error the cursor is left untouched.
    pub fn read_extension(
        &self,
        block: &Block,
        cursor: &mut Address,
        baseline: u8,
    ) -> Result<ExtRef<'_>, DecodeError> {
        let mut at = *cursor;
        let byte = block.read_byte(&mut at)?;
        let ext = match byte.checked_sub(baseline) {
            None => ExtRef::Core(byte),
            Some(i) => {
                let index = ExtIndex(u32::from(i));
                let ext = self
                    .extensions
                    .get(index)
                    .ok_or(DecodeError::UnknownExtension { index: index.0 })?;
                ExtRef::Extension { index, ext }
            }
        };
        *cursor = at;
        Ok(ext)
    }

    /// Reads an operation reference (core opcode or extension operation).
    pub fn read_operation(
        &self,
        block: &Block,
        cursor: &mut Address,
    ) -> Result<OperationRef<'_>, DecodeError> {
        let mut at = *cursor;
        let op = match self.read_extension(block, &mut at, BUILTIN_OPCODE_COUNT)? {
            ExtRef::Core(code) => {
                let op = CoreOp::from_byte(code).ok_or(DecodeError::UnknownOpcode { code })?;
                OperationRef {
                    extension: None,
                    code,
                    op: op.operation(),
                }
            }
            ExtRef::Extension { index, ext } => {
                let ops = ext.operations();
                let code = block.read_object_code(&mut at, ops.len())?;
                let op = ops
                    .get(usize::from(code))
                    .ok_or(DecodeError::UnknownOpcode { code })?;
                OperationRef {
                    extension: Some(index),
                    code,
                    op: *op,
                }
            }
        };
        *cursor = at;
        Ok(op)
    }

    /// Reads an object reference of `class`.
    pub fn read_object(
        &self,
        block: &Block,
        cursor: &mut Address,
        class: ObjectClass,
    ) -> Result<ObjectRef<'_>, DecodeError> {
        let mut at = *cursor;
        let obj = match self.read_extension(block, &mut at, class.baseline())? {
            ExtRef::Core(code) => {
                let def = class
                    .core_objects()
                    .get(usize::from(code))
                    .ok_or(DecodeError::UnknownObject { code })?;
                ObjectRef {
                    extension: None,
                    code,
                    def: *def,
                }
            }
            ExtRef::Extension { index, ext } => {
                let table = ext.objects(class);
                let code = block.read_object_code(&mut at, table.len())?;
                let def = table
                    .get(usize::from(code))
                    .ok_or(DecodeError::UnknownObject { code })?;
                ObjectRef {
                    extension: Some(index),
                    code,
                    def: *def,
                }
            }
        };
        *cursor = at;
        Ok(obj)
    }

    /// Reads the element count of a side-effect list.
    ///
    /// Every element takes at least one byte, so counts larger than the rest of the block are
    /// rejected up front.
    pub fn read_side_effect_count(
        &self,
        block: &Block,
        cursor: &mut Address,
    ) -> Result<usize, DecodeError> {
        let mut at = *cursor;
        let count = block.read_integer(&mut at)?;
        let count = usize::try_from(count).map_err(|_| DecodeError::OutOfBounds)?;
        if count > block.size() - at {
            return Err(DecodeError::OutOfBounds);
        }
        *cursor = at;
        Ok(count)
    }

    /// Reads one side-effect reference.
    pub fn read_side_effect(
        &self,
        block: &Block,
        cursor: &mut Address,
    ) -> Result<SideEffect<'_>, DecodeError> {
        let object = self.read_object(block, cursor, ObjectClass::SideEffect)?;
        // Side effects have no core table, so every reference names an extension.
        let extension = object
            .extension
            .and_then(|i| self.extensions.get(i))
            .map_or("", |e| e.name());
        Ok(SideEffect { extension, object })
    }

    /// Reads a complete side-effect list.
    pub fn read_side_effects(
        &self,
        block: &Block,
        cursor: &mut Address,
    ) -> Result<Vec<SideEffect<'_>>, DecodeError> {
        let count = self.read_side_effect_count(block, cursor)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.read_side_effect(block, cursor)?);
        }
        Ok(out)
    }

    /// Encodes this program into the container format.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        // header:
        // - magic [8]
        // - major u16le
        // - minor u16le
        //
        // sections (tagged):
        // - u8 tag, vlq len, payload[len]
        //
        // Tags:
        // 1 = extensions (name, block id or 0)
        // 2 = blocks (main first)
        // 3 = lines (address delta, line)
        let mut w = Writer::new();
        w.write_bytes(MAGIC);
        w.write_u16_le(VERSION_MAJOR);
        w.write_u16_le(VERSION_MINOR);

        {
            let mut payload = Writer::new();
            payload.write_vlq_u64(self.extensions.len() as u64);
            for (index, ext) in self.extensions.iter() {
                payload.write_len_prefixed(ext.name().as_bytes());
                let block = self.extensions.block(index).map_or(0, |b| b.0);
                payload.write_vlq_u64(u64::from(block));
            }
            write_section(&mut w, SectionTag::Extensions, payload.as_slice());
        }

        {
            let mut payload = Writer::new();
            payload.write_vlq_u64(self.block_count() as u64);
            payload.write_len_prefixed(self.main.as_bytes());
            for b in &self.blocks {
                payload.write_len_prefixed(b.as_bytes());
            }
            write_section(&mut w, SectionTag::Blocks, payload.as_slice());
        }

        if !self.lines.is_empty() {
            let mut payload = Writer::new();
            payload.write_vlq_u64(self.lines.len() as u64);
            let mut prev = 0;
            for e in &self.lines {
                payload.write_vlq_u64((e.address - prev) as u64);
                payload.write_vlq_u64(u64::from(e.line));
                prev = e.address;
            }
            write_section(&mut w, SectionTag::Lines, payload.as_slice());
        }

        w.into_vec()
    }

    /// Decodes a container-format program, resolving extension names through `registry`.
    pub fn decode(bytes: &[u8], registry: &ExtensionRegistry) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        let magic = r.read_bytes(MAGIC.len())?;
        if magic != MAGIC {
            return Err(DecodeError::BadMagic);
        }

        let major = r.read_u16_le()?;
        let minor = r.read_u16_le()?;
        if major != VERSION_MAJOR || minor != VERSION_MINOR {
            return Err(DecodeError::UnsupportedVersion { major, minor });
        }

        decode_current(r, registry)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SectionTag {
    Extensions = 1,
    Blocks = 2,
    Lines = 3,
}

impl SectionTag {
    fn from_u8_opt(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Extensions),
            2 => Some(Self::Blocks),
            3 => Some(Self::Lines),
            _ => None,
        }
    }
}

fn write_section(w: &mut Writer, tag: SectionTag, payload: &[u8]) {
    w.write_u8(tag as u8);
    w.write_vlq_u64(payload.len() as u64);
    w.write_bytes(payload);
}

fn decode_current(mut r: Reader<'_>, registry: &ExtensionRegistry) -> Result<Program, DecodeError> {
    let mut extensions: Vec<(String, u32)> = Vec::new();
    let mut blocks: Vec<Block> = Vec::new();
    let mut lines: Vec<LineEntry> = Vec::new();

    let mut saw_extensions = false;
    let mut saw_blocks = false;
    let mut saw_lines = false;

    while !r.is_empty() {
        let tag = SectionTag::from_u8_opt(r.read_u8()?);
        let len = r.read_len()?;
        let payload = r.read_bytes(len)?;
        match tag {
            Some(SectionTag::Extensions) => {
                if saw_extensions {
                    return Err(DecodeError::DuplicateSection);
                }
                saw_extensions = true;
                extensions = decode_extensions(payload)?;
            }
            Some(SectionTag::Blocks) => {
                if saw_blocks {
                    return Err(DecodeError::DuplicateSection);
                }
                saw_blocks = true;
                blocks = decode_blocks(payload)?;
            }
            Some(SectionTag::Lines) => {
                if saw_lines {
                    return Err(DecodeError::DuplicateSection);
                }
                saw_lines = true;
                lines = decode_lines(payload)?;
            }
            None => {
                // Forward-compat: skip unknown section tags.
            }
        }
    }

    if !saw_extensions {
        return Err(DecodeError::MissingSection {
            tag: SectionTag::Extensions as u8,
        });
    }
    if !saw_blocks {
        return Err(DecodeError::MissingSection {
            tag: SectionTag::Blocks as u8,
        });
    }

    let mut blocks = blocks.into_iter();
    let main = blocks.next().ok_or(DecodeError::OutOfBounds)?;
    let blocks: Vec<Block> = blocks.collect();

    let mut table = ExtensionTable::new();
    for (name, block) in extensions {
        let ext = registry
            .get(&name)
            .ok_or_else(|| DecodeError::UnknownExtensionName { name: name.clone() })?;
        if table.index_of(&name).is_some() {
            return Err(DecodeError::DuplicateExtension { name });
        }
        let index = table.register(ext);
        if block != 0 {
            if block as usize > blocks.len() {
                return Err(DecodeError::OutOfBounds);
            }
            if table.iter().any(|(i, _)| table.block(i) == Some(BlockId(block))) {
                return Err(DecodeError::DuplicateExtensionBlock { block });
            }
            table.set_block(index, BlockId(block));
        }
    }

    if let Some(last) = lines.last()
        && last.address > main.size()
    {
        return Err(DecodeError::OutOfBounds);
    }

    Ok(Program {
        main,
        blocks,
        extensions: table,
        lines,
    })
}

fn decode_extensions(payload: &[u8]) -> Result<Vec<(String, u32)>, DecodeError> {
    let mut r = Reader::new(payload);
    let count = r.read_len()?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let len = r.read_len()?;
        let name = String::from(r.read_str(len)?);
        let block = r.read_vlq_u32()?;
        out.push((name, block));
    }
    if !r.is_empty() {
        return Err(DecodeError::OutOfBounds);
    }
    Ok(out)
}

fn decode_blocks(payload: &[u8]) -> Result<Vec<Block>, DecodeError> {
    let mut r = Reader::new(payload);
    let count = r.read_len()?;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let len = r.read_len()?;
        out.push(Block::from_bytes(r.read_bytes(len)?.to_vec()));
    }
    if !r.is_empty() {
        return Err(DecodeError::OutOfBounds);
    }
    Ok(out)
}

fn decode_lines(payload: &[u8]) -> Result<Vec<LineEntry>, DecodeError> {
    let mut r = Reader::new(payload);
    let count = r.read_len()?;
    let mut out = Vec::with_capacity(count);
    let mut address: Address = 0;
    for _ in 0..count {
        let delta = usize::try_from(r.read_vlq_u64()?).map_err(|_| DecodeError::OutOfBounds)?;
        address = address.checked_add(delta).ok_or(DecodeError::OutOfBounds)?;
        let line = r.read_vlq_u32()?;
        out.push(LineEntry { address, line });
    }
    if !r.is_empty() {
        return Err(DecodeError::OutOfBounds);
    }
    Ok(out)
}

/// Builds a [`Program`] block by block.
///
/// Extensions are interned in the order they are first referenced, whether by an emitted
/// operation or object or by an explicit [`ProgramBuilder::register_extension`].
#[derive(Clone, Debug, Default)]
pub struct ProgramBuilder {
    main: Block,
    blocks: Vec<Block>,
    extensions: ExtensionTable,
    lines: Vec<LineEntry>,
}

impl ProgramBuilder {
    /// Creates a builder holding an empty main block.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The main block as emitted so far.
    #[must_use]
    pub fn code(&self) -> &Block {
        &self.main
    }

    /// The main block, for emission.
    pub fn main_block(&mut self) -> &mut Block {
        &mut self.main
    }

    /// Looks up a block for emission.
    pub fn block_mut(&mut self, id: BlockId) -> Result<&mut Block, EmitError> {
        match id.0.checked_sub(1) {
            None => Ok(&mut self.main),
            Some(i) => self
                .blocks
                .get_mut(i as usize)
                .ok_or(EmitError::UnknownBlock { block: id.0 }),
        }
    }

    /// Appends a new empty block.
    pub fn create_block(&mut self) -> BlockId {
        self.blocks.push(Block::new());
        BlockId(u32::try_from(self.blocks.len()).unwrap_or(u32::MAX))
    }

    /// Interns `ext` without emitting anything.
    pub fn register_extension(&mut self, ext: &Arc<dyn Extension>) -> ExtIndex {
        self.extensions.register(ext)
    }

    /// The private block of `ext`, created (and `ext` interned) on first use.
    pub fn extension_block(&mut self, ext: &Arc<dyn Extension>) -> BlockId {
        let index = self.extensions.register(ext);
        if let Some(block) = self.extensions.block(index) {
            return block;
        }
        let block = self.create_block();
        self.extensions.set_block(index, block);
        block
    }

    /// Emits a reference to `ext` as the single byte `baseline + index`.
    pub fn emit_extension(
        &mut self,
        block: BlockId,
        ext: &Arc<dyn Extension>,
        baseline: u8,
    ) -> Result<Address, EmitError> {
        self.block_mut(block)?;
        // Only intern once the reference is known to fit.
        let index = self
            .extensions
            .index_of(ext.name())
            .map_or(self.extensions.len(), |i| i.0 as usize);
        let byte = u8::try_from(index)
            .ok()
            .and_then(|i| baseline.checked_add(i))
            .ok_or(EmitError::TooManyExtensions)?;
        self.extensions.register(ext);
        Ok(self.block_mut(block)?.emit_byte(byte))
    }

    /// Emits a core opcode.
    pub fn emit_core_operation(&mut self, block: BlockId, op: CoreOp) -> Result<Address, EmitError> {
        Ok(self.block_mut(block)?.emit_byte(op.byte()))
    }

    /// Emits operation `code` of `ext`.
    pub fn emit_extension_operation(
        &mut self,
        block: BlockId,
        ext: &Arc<dyn Extension>,
        code: u8,
    ) -> Result<Address, EmitError> {
        let count = ext.operations().len();
        check_member(code, count)?;
        let address = self.emit_extension(block, ext, BUILTIN_OPCODE_COUNT)?;
        self.block_mut(block)?.emit_extension_object(count, code)?;
        Ok(address)
    }

    /// Emits a reference to core object `code` of `class`.
    pub fn emit_core_object(
        &mut self,
        block: BlockId,
        class: ObjectClass,
        code: u8,
    ) -> Result<Address, EmitError> {
        check_member(code, class.core_objects().len())?;
        Ok(self.block_mut(block)?.emit_byte(code))
    }

    /// Emits a reference to object `code` of `class` contributed by `ext`.
    pub fn emit_extension_object(
        &mut self,
        block: BlockId,
        class: ObjectClass,
        ext: &Arc<dyn Extension>,
        code: u8,
    ) -> Result<Address, EmitError> {
        let count = ext.objects(class).len();
        check_member(code, count)?;
        let address = self.emit_extension(block, ext, class.baseline())?;
        self.block_mut(block)?.emit_extension_object(count, code)?;
        Ok(address)
    }

    /// Records that code emitted from now on in the main block belongs to script `line`.
    pub fn mark_line(&mut self, line: u32) {
        let address = self.main.size();
        match self.lines.last_mut() {
            Some(last) if last.address == address => last.line = line,
            Some(last) if last.line == line => {}
            _ => self.lines.push(LineEntry { address, line }),
        }
    }

    /// Finishes the program.
    #[must_use]
    pub fn finish(self) -> Program {
        Program {
            main: self.main,
            blocks: self.blocks,
            extensions: self.extensions,
            lines: self.lines,
        }
    }
}

fn check_member(code: u8, count: usize) -> Result<(), EmitError> {
    if usize::from(code) < count {
        Ok(())
    } else {
        Err(EmitError::ObjectOutOfRange { code, count })
    }
}
