//! Bytecode encoding.
//!
//! [`CodeWriter`] is the sink [`CfInstruction::encode`](super::CfInstruction::encode) writes
//! through. [`BytecodeWriter`] is the concrete implementation: it appends opcode bytes,
//! allocates constant pool entries on demand, and records branch fixups that are resolved
//! once every label is bound.
//!
//! Branch offsets are relative to the position of the branch opcode. `goto_w` is never
//! emitted; a branch whose offset does not fit 16 bits is reported as malformed.

use std::collections::{BTreeMap, HashMap};

use crate::{
    code::{
        constant::{CallSite, HandleMember, MethodHandleRef},
        CfCode, CfFrame, ConstValue, FrameType, Label,
    },
    program::references::{FieldRef, MethodRef, Name, ProtoRef, TypeRef},
    Error, Result,
};

/// Receiver of encoded instructions.
pub trait CodeWriter {
    /// Writes an opcode byte.
    ///
    /// # Errors
    ///
    /// Returns an error if the code exceeds the maximum method size.
    fn opcode(&mut self, opcode: u8) -> Result<()>;

    /// Writes an operand byte.
    ///
    /// # Errors
    ///
    /// Returns an error if the code exceeds the maximum method size.
    fn u8(&mut self, value: u8) -> Result<()>;

    /// Writes a big-endian operand short.
    ///
    /// # Errors
    ///
    /// Returns an error if the code exceeds the maximum method size.
    fn u16(&mut self, value: u16) -> Result<()>;

    /// Writes the 16-bit offset of a branch whose opcode was just written.
    ///
    /// # Errors
    ///
    /// Returns an error if the code exceeds the maximum method size.
    fn branch(&mut self, target: Label) -> Result<()>;

    /// Writes a complete `tableswitch` or `lookupswitch`.
    ///
    /// # Errors
    ///
    /// Returns an error if `keys` and `targets` differ in length.
    fn switch(&mut self, default: Label, keys: &[i32], targets: &[Label]) -> Result<()>;

    /// Binds `label` to the current position.
    ///
    /// # Errors
    ///
    /// Returns an error if the label is already bound.
    fn bind_label(&mut self, label: Label) -> Result<()>;

    /// Records a stack map frame at the current position.
    ///
    /// # Errors
    ///
    /// Returns an error if a frame was already recorded at this position.
    fn frame(&mut self, frame: &CfFrame) -> Result<()>;

    /// Pool index of a loadable constant.
    ///
    /// # Errors
    ///
    /// Returns an error if the constant pool is full.
    fn constant(&mut self, value: &ConstValue) -> Result<u16>;

    /// Pool index of a `CONSTANT_Class`.
    ///
    /// # Errors
    ///
    /// Returns an error if the constant pool is full.
    fn class_constant(&mut self, ty: &TypeRef) -> Result<u16>;

    /// Pool index of a `CONSTANT_Fieldref`.
    ///
    /// # Errors
    ///
    /// Returns an error if the constant pool is full.
    fn field_constant(&mut self, field: &FieldRef) -> Result<u16>;

    /// Pool index of a `CONSTANT_Methodref` or `CONSTANT_InterfaceMethodref`.
    ///
    /// # Errors
    ///
    /// Returns an error if the constant pool is full.
    fn method_constant(&mut self, method: &MethodRef, interface: bool) -> Result<u16>;

    /// Pool index of a `CONSTANT_InvokeDynamic`.
    ///
    /// # Errors
    ///
    /// Returns an error if the constant pool is full.
    fn call_site_constant(&mut self, call_site: &CallSite) -> Result<u16>;
}

/// A constant pool entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PoolEntry {
    /// `CONSTANT_Utf8`
    Utf8(Name),
    /// `CONSTANT_Integer`
    Integer(i32),
    /// `CONSTANT_Float`
    Float(u32),
    /// `CONSTANT_Long`; occupies two indices
    Long(i64),
    /// `CONSTANT_Double`; occupies two indices
    Double(u64),
    /// `CONSTANT_Class`
    Class(u16),
    /// `CONSTANT_String`
    String(u16),
    /// `CONSTANT_Fieldref`
    FieldRef(u16, u16),
    /// `CONSTANT_Methodref`
    MethodRef(u16, u16),
    /// `CONSTANT_InterfaceMethodref`
    InterfaceMethodRef(u16, u16),
    /// `CONSTANT_NameAndType`
    NameAndType(u16, u16),
    /// `CONSTANT_MethodHandle`
    MethodHandle(u8, u16),
    /// `CONSTANT_MethodType`
    MethodType(u16),
    /// `CONSTANT_InvokeDynamic`
    InvokeDynamic(u16, u16),
}

impl PoolEntry {
    fn is_wide(&self) -> bool {
        matches!(self, PoolEntry::Long(_) | PoolEntry::Double(_))
    }
}

/// A deduplicating constant pool with its bootstrap method table.
#[derive(Debug, Default)]
pub struct ConstantPool {
    entries: Vec<PoolEntry>,
    indices: HashMap<PoolEntry, u16>,
    next_index: u16,
    bootstrap_methods: Vec<(u16, Vec<u16>)>,
}

impl ConstantPool {
    /// Creates an empty pool; the first entry gets index 1.
    #[must_use]
    pub fn new() -> Self {
        ConstantPool {
            next_index: 1,
            ..Default::default()
        }
    }

    /// Index of `entry`, adding it when absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] when the pool exceeds 65535 slots.
    pub fn add(&mut self, entry: PoolEntry) -> Result<u16> {
        if let Some(&index) = self.indices.get(&entry) {
            return Ok(index);
        }
        let index = self.next_index;
        let width = if entry.is_wide() { 2 } else { 1 };
        self.next_index = index
            .checked_add(width)
            .filter(|next| *next != 0)
            .ok_or_else(|| malformed_error!("Constant pool overflow"))?;
        self.indices.insert(entry.clone(), index);
        self.entries.push(entry);
        Ok(index)
    }

    /// Entries in insertion order.
    #[must_use]
    pub fn entries(&self) -> &[PoolEntry] {
        &self.entries
    }

    /// The `constant_pool_count` value (highest index plus one).
    #[must_use]
    pub fn count(&self) -> u16 {
        self.next_index
    }

    /// Bootstrap method table: handle index and argument indices.
    #[must_use]
    pub fn bootstrap_methods(&self) -> &[(u16, Vec<u16>)] {
        &self.bootstrap_methods
    }

    /// Index of a `CONSTANT_Utf8`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] when the pool overflows.
    pub fn utf8(&mut self, value: &str) -> Result<u16> {
        self.add(PoolEntry::Utf8(Name::new(value)))
    }

    /// Index of a `CONSTANT_Class`. Array classes use their descriptor as name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] when the pool overflows.
    pub fn class(&mut self, ty: &TypeRef) -> Result<u16> {
        let name = self.utf8(ty.internal_name())?;
        self.add(PoolEntry::Class(name))
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name = self.utf8(name)?;
        let descriptor = self.utf8(descriptor)?;
        self.add(PoolEntry::NameAndType(name, descriptor))
    }

    /// Index of a `CONSTANT_Fieldref`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] when the pool overflows.
    pub fn field(&mut self, field: &FieldRef) -> Result<u16> {
        let class = self.class(&field.holder)?;
        let nat = self.name_and_type(field.name.as_str(), field.ty.descriptor())?;
        self.add(PoolEntry::FieldRef(class, nat))
    }

    /// Index of a method reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] when the pool overflows.
    pub fn method(&mut self, method: &MethodRef, interface: bool) -> Result<u16> {
        let class = self.class(&method.holder)?;
        let nat = self.name_and_type(method.name.as_str(), method.proto.descriptor())?;
        if interface {
            self.add(PoolEntry::InterfaceMethodRef(class, nat))
        } else {
            self.add(PoolEntry::MethodRef(class, nat))
        }
    }

    fn method_type(&mut self, proto: &ProtoRef) -> Result<u16> {
        let descriptor = self.utf8(proto.descriptor())?;
        self.add(PoolEntry::MethodType(descriptor))
    }

    fn method_handle(&mut self, handle: &MethodHandleRef) -> Result<u16> {
        let member = match &handle.member {
            HandleMember::Field(field) => self.field(field)?,
            HandleMember::Method(method) => self.method(method, handle.interface)?,
        };
        self.add(PoolEntry::MethodHandle(handle.kind as u8, member))
    }

    /// Index of a loadable constant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] for `null`, which has no pool form, or on overflow.
    pub fn constant(&mut self, value: &ConstValue) -> Result<u16> {
        match value {
            ConstValue::Null => Err(malformed_error!("null has no constant pool entry")),
            ConstValue::Int(v) => self.add(PoolEntry::Integer(*v)),
            ConstValue::Long(v) => self.add(PoolEntry::Long(*v)),
            ConstValue::Float(bits) => self.add(PoolEntry::Float(*bits)),
            ConstValue::Double(bits) => self.add(PoolEntry::Double(*bits)),
            ConstValue::String(s) => {
                let utf8 = self.utf8(s.as_str())?;
                self.add(PoolEntry::String(utf8))
            }
            ConstValue::Class(ty) => self.class(ty),
            ConstValue::MethodType(proto) => self.method_type(proto),
            ConstValue::MethodHandle(handle) => self.method_handle(handle),
        }
    }

    /// Index of a `CONSTANT_InvokeDynamic`, registering its bootstrap method.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] when the pool overflows.
    pub fn call_site(&mut self, call_site: &CallSite) -> Result<u16> {
        let handle = self.method_handle(&call_site.bootstrap)?;
        let arguments = call_site
            .arguments
            .iter()
            .map(|arg| self.constant(arg))
            .collect::<Result<Vec<_>>>()?;
        let bootstrap = match self
            .bootstrap_methods
            .iter()
            .position(|(h, args)| *h == handle && *args == arguments)
        {
            Some(position) => position,
            None => {
                self.bootstrap_methods.push((handle, arguments));
                self.bootstrap_methods.len() - 1
            }
        };
        let bootstrap = u16::try_from(bootstrap)
            .map_err(|_| malformed_error!("Too many bootstrap methods"))?;
        let nat = self.name_and_type(call_site.name.as_str(), call_site.proto.descriptor())?;
        self.add(PoolEntry::InvokeDynamic(bootstrap, nat))
    }
}

#[derive(Debug)]
struct BranchFixup {
    target: Label,
    opcode_position: usize,
    operand_position: usize,
    wide: bool,
}

/// An exception table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    /// First covered offset
    pub start_pc: u16,
    /// First offset after the covered range
    pub end_pc: u16,
    /// Handler offset
    pub handler_pc: u16,
    /// Pool index of the caught class, 0 for catch-all
    pub catch_type: u16,
}

/// The encoded `Code` attribute contents.
#[derive(Debug, Clone)]
pub struct EncodedCode {
    /// Maximum operand stack depth
    pub max_stack: u16,
    /// Number of local slots
    pub max_locals: u16,
    /// Bytecode
    pub bytes: Vec<u8>,
    /// Exception table
    pub exception_table: Vec<ExceptionTableEntry>,
    /// Offset of every bound label
    pub labels: BTreeMap<Label, u32>,
    /// Encoded `StackMapTable` entries, empty when no frames were written
    pub stack_map_table: Vec<u8>,
    /// Number of `StackMapTable` entries
    pub stack_map_entries: u16,
}

/// Encodes instructions into bytecode against a [`ConstantPool`].
#[derive(Debug)]
pub struct BytecodeWriter<'a> {
    pool: &'a mut ConstantPool,
    bytes: Vec<u8>,
    labels: BTreeMap<Label, u32>,
    fixups: Vec<BranchFixup>,
    frames: Vec<(u32, CfFrame)>,
    last_opcode: usize,
}

/// Encodes a whole method body, including its exception table.
///
/// # Errors
///
/// Returns [`Error::Malformed`] if an instruction cannot be encoded, a label is unbound,
/// or a branch offset does not fit.
pub fn encode_code(pool: &mut ConstantPool, code: &CfCode) -> Result<EncodedCode> {
    let mut writer = BytecodeWriter::new(&mut *pool);
    for instruction in &code.instructions {
        instruction.encode(&mut writer)?;
    }
    let mut encoded = writer.finish()?;
    encoded.max_stack = code.max_stack;
    encoded.max_locals = code.max_locals;
    for range in &code.try_catch_ranges {
        let start = label_offset(&encoded.labels, range.start)?;
        let end = label_offset(&encoded.labels, range.end)?;
        if start == end {
            continue;
        }
        for (guard, target) in range.guards.iter().zip(&range.targets) {
            let catch_type = match guard {
                Some(ty) => pool.class(ty)?,
                None => 0,
            };
            encoded.exception_table.push(ExceptionTableEntry {
                start_pc: to_u16(start, "try start")?,
                end_pc: to_u16(end, "try end")?,
                handler_pc: to_u16(label_offset(&encoded.labels, *target)?, "handler")?,
                catch_type,
            });
        }
    }
    Ok(encoded)
}

/// JVM limit on the length of a method's bytecode.
const MAX_CODE_LENGTH: usize = 65535;

impl<'a> BytecodeWriter<'a> {
    /// Creates a writer allocating constants in `pool`.
    pub fn new(pool: &'a mut ConstantPool) -> Self {
        BytecodeWriter {
            pool,
            bytes: Vec::new(),
            labels: BTreeMap::new(),
            fixups: Vec::new(),
            frames: Vec::new(),
            last_opcode: 0,
        }
    }

    fn position(&self) -> usize {
        self.bytes.len()
    }

    fn push(&mut self, byte: u8) -> Result<()> {
        if self.bytes.len() >= MAX_CODE_LENGTH {
            return Err(malformed_error!("Method code exceeds {} bytes", MAX_CODE_LENGTH));
        }
        self.bytes.push(byte);
        Ok(())
    }

    fn push_i32(&mut self, value: i32) -> Result<()> {
        for byte in value.to_be_bytes() {
            self.push(byte)?;
        }
        Ok(())
    }

    /// Resolves branch fixups and encodes frames.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Malformed`] for unbound labels and out-of-range offsets.
    pub fn finish(mut self) -> Result<EncodedCode> {
        for fixup in std::mem::take(&mut self.fixups) {
            let target = label_offset(&self.labels, fixup.target)? as i64;
            let offset = target - fixup.opcode_position as i64;
            if fixup.wide {
                let value = i32::try_from(offset)
                    .map_err(|_| malformed_error!("Switch offset {} out of range", offset))?;
                self.bytes[fixup.operand_position..fixup.operand_position + 4]
                    .copy_from_slice(&value.to_be_bytes());
            } else {
                let value = i16::try_from(offset)
                    .map_err(|_| malformed_error!("Branch offset {} out of range", offset))?;
                self.bytes[fixup.operand_position..fixup.operand_position + 2]
                    .copy_from_slice(&value.to_be_bytes());
            }
        }
        let (stack_map_table, stack_map_entries) = self.encode_frames()?;
        Ok(EncodedCode {
            max_stack: 0,
            max_locals: 0,
            bytes: self.bytes,
            exception_table: Vec::new(),
            labels: self.labels,
            stack_map_table,
            stack_map_entries,
        })
    }

    /// Writes every frame as a `full_frame` entry.
    fn encode_frames(&mut self) -> Result<(Vec<u8>, u16)> {
        let mut out = Vec::new();
        let mut previous: Option<u32> = None;
        let frames = std::mem::take(&mut self.frames);
        for (offset, frame) in &frames {
            let delta = match previous {
                None => *offset,
                Some(previous) => offset - previous - 1,
            };
            previous = Some(*offset);
            out.push(255);
            out.extend_from_slice(&to_u16(delta, "frame offset")?.to_be_bytes());
            let locals = frame.dense_locals();
            out.extend_from_slice(&to_u16(locals.len() as u32, "frame locals")?.to_be_bytes());
            for local in &locals {
                self.encode_verification_type(local, &mut out)?;
            }
            out.extend_from_slice(
                &to_u16(frame.stack.len() as u32, "frame stack")?.to_be_bytes(),
            );
            for value in &frame.stack {
                self.encode_verification_type(value, &mut out)?;
            }
        }
        let count = to_u16(frames.len() as u32, "frame count")?;
        Ok((out, count))
    }

    fn encode_verification_type(&mut self, ty: &FrameType, out: &mut Vec<u8>) -> Result<()> {
        match ty {
            FrameType::Top => out.push(0),
            FrameType::Int => out.push(1),
            FrameType::Float => out.push(2),
            FrameType::Double => out.push(3),
            FrameType::Long => out.push(4),
            FrameType::Null => out.push(5),
            FrameType::UninitializedThis => out.push(6),
            FrameType::Initialized(class) => {
                let index = self.pool.class(class)?;
                out.push(7);
                out.extend_from_slice(&index.to_be_bytes());
            }
            FrameType::Uninitialized(label) => {
                let offset = label_offset(&self.labels, *label)?;
                out.push(8);
                out.extend_from_slice(&to_u16(offset, "uninitialized offset")?.to_be_bytes());
            }
        }
        Ok(())
    }
}

impl CodeWriter for BytecodeWriter<'_> {
    fn opcode(&mut self, opcode: u8) -> Result<()> {
        self.last_opcode = self.position();
        self.push(opcode)
    }

    fn u8(&mut self, value: u8) -> Result<()> {
        self.push(value)
    }

    fn u16(&mut self, value: u16) -> Result<()> {
        let [high, low] = value.to_be_bytes();
        self.push(high)?;
        self.push(low)
    }

    fn branch(&mut self, target: Label) -> Result<()> {
        self.fixups.push(BranchFixup {
            target,
            opcode_position: self.last_opcode,
            operand_position: self.position(),
            wide: false,
        });
        self.u16(0)
    }

    fn switch(&mut self, default: Label, keys: &[i32], targets: &[Label]) -> Result<()> {
        if keys.len() != targets.len() {
            return Err(malformed_error!(
                "Switch with {} keys and {} targets",
                keys.len(),
                targets.len()
            ));
        }
        let mut sorted: Vec<(i32, Label)> =
            keys.iter().copied().zip(targets.iter().copied()).collect();
        sorted.sort_by_key(|(key, _)| *key);
        if sorted.windows(2).any(|pair| pair[0].0 == pair[1].0) {
            return Err(malformed_error!("Switch with duplicate keys"));
        }

        let table = match (sorted.first(), sorted.last()) {
            (Some((low, _)), Some((high, _))) => {
                let range = i64::from(*high) - i64::from(*low) + 1;
                // tableswitch when at most half of the range would be padding
                range <= 2 * sorted.len() as i64
            }
            _ => false,
        };

        let opcode_position = self.position();
        self.opcode(if table { 0xaa } else { 0xab })?;
        while self.position() % 4 != 0 {
            self.push(0)?;
        }
        let add_target = |writer: &mut Self, target: Label| -> Result<()> {
            writer.fixups.push(BranchFixup {
                target,
                opcode_position,
                operand_position: writer.position(),
                wide: true,
            });
            writer.push_i32(0)
        };
        add_target(self, default)?;
        if table {
            let low = sorted.first().map_or(0, |(key, _)| *key);
            let high = sorted.last().map_or(0, |(key, _)| *key);
            self.push_i32(low)?;
            self.push_i32(high)?;
            let mut entries = sorted.iter().peekable();
            for key in low..=high {
                match entries.next_if(|(k, _)| *k == key) {
                    Some((_, target)) => add_target(self, *target)?,
                    None => add_target(self, default)?,
                }
            }
        } else {
            self.push_i32(sorted.len() as i32)?;
            for (key, target) in &sorted {
                self.push_i32(*key)?;
                add_target(self, *target)?;
            }
        }
        Ok(())
    }

    fn bind_label(&mut self, label: Label) -> Result<()> {
        let position = self.position() as u32;
        if self.labels.insert(label, position).is_some() {
            return Err(malformed_error!("Label {} bound twice", label));
        }
        Ok(())
    }

    fn frame(&mut self, frame: &CfFrame) -> Result<()> {
        let position = self.position() as u32;
        if self.frames.last().is_some_and(|(offset, _)| *offset == position) {
            return Err(malformed_error!("Two frames at offset {}", position));
        }
        self.frames.push((position, frame.clone()));
        Ok(())
    }

    fn constant(&mut self, value: &ConstValue) -> Result<u16> {
        self.pool.constant(value)
    }

    fn class_constant(&mut self, ty: &TypeRef) -> Result<u16> {
        self.pool.class(ty)
    }

    fn field_constant(&mut self, field: &FieldRef) -> Result<u16> {
        self.pool.field(field)
    }

    fn method_constant(&mut self, method: &MethodRef, interface: bool) -> Result<u16> {
        self.pool.method(method, interface)
    }

    fn call_site_constant(&mut self, call_site: &CallSite) -> Result<u16> {
        self.pool.call_site(call_site)
    }
}

fn label_offset(labels: &BTreeMap<Label, u32>, label: Label) -> Result<u32> {
    labels
        .get(&label)
        .copied()
        .ok_or_else(|| malformed_error!("Unbound label {}", label))
}

fn to_u16(value: u32, what: &str) -> Result<u16> {
    u16::try_from(value).map_err(|_| Error::Malformed {
        message: format!("{what} {value} does not fit in 16 bits"),
        file: file!(),
        line: line!(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::{
        instruction::{CfInstruction, IfCond, InvokeKind},
        CfTryCatch,
    };
    use crate::program::descriptor::ValueKind;

    fn encode_all(instructions: &[CfInstruction]) -> EncodedCode {
        let mut pool = ConstantPool::new();
        let mut writer = BytecodeWriter::new(&mut pool);
        for instruction in instructions {
            instruction.encode(&mut writer).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_short_forms() {
        let encoded = encode_all(&[
            CfInstruction::Const(ConstValue::Int(3)),
            CfInstruction::Const(ConstValue::Int(-1)),
            CfInstruction::Const(ConstValue::Int(100)),
            CfInstruction::Load {
                kind: ValueKind::Reference,
                local: 0,
            },
            CfInstruction::Store {
                kind: ValueKind::Int,
                local: 7,
            },
            CfInstruction::Return(None),
        ]);
        assert_eq!(encoded.bytes, vec![0x06, 0x02, 0x10, 100, 0x2a, 0x36, 7, 0xb1]);
    }

    #[test]
    fn test_backward_branch_offset() {
        let encoded = encode_all(&[
            CfInstruction::Label(Label(0)),
            CfInstruction::Nop,
            CfInstruction::Goto(Label(0)),
        ]);
        // goto at offset 1 jumping to 0
        assert_eq!(encoded.bytes, vec![0x00, 0xa7, 0xff, 0xff]);
    }

    #[test]
    fn test_forward_branch_offset() {
        let encoded = encode_all(&[
            CfInstruction::Load {
                kind: ValueKind::Int,
                local: 0,
            },
            CfInstruction::If {
                cond: IfCond::Eq,
                kind: ValueKind::Int,
                target: Label(1),
            },
            CfInstruction::Nop,
            CfInstruction::Label(Label(1)),
            CfInstruction::Return(None),
        ]);
        assert_eq!(encoded.bytes, vec![0x1a, 0x99, 0x00, 0x04, 0x00, 0xb1]);
        assert_eq!(encoded.labels[&Label(1)], 5);
    }

    #[test]
    fn test_unbound_label_is_malformed() {
        let mut pool = ConstantPool::new();
        let mut writer = BytecodeWriter::new(&mut pool);
        CfInstruction::Goto(Label(9)).encode(&mut writer).unwrap();
        assert!(writer.finish().is_err());
    }

    #[test]
    fn test_dense_switch_uses_tableswitch() {
        let encoded = encode_all(&[
            CfInstruction::Load {
                kind: ValueKind::Int,
                local: 0,
            },
            CfInstruction::Switch {
                default: Label(9),
                keys: vec![0, 1, 2],
                targets: vec![Label(0), Label(1), Label(2)],
            },
            CfInstruction::Label(Label(0)),
            CfInstruction::Label(Label(1)),
            CfInstruction::Label(Label(2)),
            CfInstruction::Label(Label(9)),
            CfInstruction::Return(None),
        ]);
        assert_eq!(encoded.bytes[1], 0xaa);
        // opcode at 1, padding to 4, then default, low, high and three targets
        assert_eq!(encoded.bytes.len(), 4 + 4 * 6 + 1);
    }

    #[test]
    fn test_constant_pool_deduplicates() {
        let mut pool = ConstantPool::new();
        let a = pool.constant(&ConstValue::string("x")).unwrap();
        let b = pool.constant(&ConstValue::string("x")).unwrap();
        assert_eq!(a, b);
        let long = pool.constant(&ConstValue::Long(1 << 40)).unwrap();
        let next = pool.constant(&ConstValue::Int(1 << 20)).unwrap();
        assert_eq!(next, long + 2);
    }

    #[test]
    fn test_exception_table() {
        let code = CfCode {
            max_stack: 1,
            max_locals: 0,
            instructions: vec![
                CfInstruction::Label(Label(0)),
                CfInstruction::Invoke {
                    kind: InvokeKind::Static,
                    method: MethodRef::parse("a/A", "f", "()V").unwrap(),
                    interface: false,
                },
                CfInstruction::Label(Label(1)),
                CfInstruction::Return(None),
                CfInstruction::Label(Label(2)),
                CfInstruction::Throw,
            ],
            try_catch_ranges: vec![CfTryCatch {
                start: Label(0),
                end: Label(1),
                guards: vec![None],
                targets: vec![Label(2)],
            }],
            local_variables: Vec::new(),
        };
        let mut pool = ConstantPool::new();
        let encoded = encode_code(&mut pool, &code).unwrap();
        assert_eq!(
            encoded.exception_table,
            vec![ExceptionTableEntry {
                start_pc: 0,
                end_pc: 3,
                handler_pc: 4,
                catch_type: 0
            }]
        );
    }
}
