//! Builder for methods the pipeline generates itself.
//!
//! [`SyntheticMethodBuilder`] collects the name, prototype, access flags and a code
//! generator closure, then produces a [`SyntheticMethod`]: a validated [`MethodDef`] ready
//! to be added to a class, together with its optimization info. The generator may produce
//! either stack-machine code directly or IR; IR is converted with the
//! [`IrEmitter`](super::IrEmitter) for the class-file version the builder was given.
//!
//! # Examples
//!
//! ```rust
//! use cfshrink::code::{CfCode, CfInstruction};
//! use cfshrink::ir::{SyntheticCode, SyntheticMethodBuilder};
//! use cfshrink::program::{flags::MethodAccessFlags, references::{ProtoRef, TypeRef}};
//!
//! let method = SyntheticMethodBuilder::new(TypeRef::class("app/Main"))
//!     .name("noop$synthetic")
//!     .proto(ProtoRef::parse("()V")?)
//!     .access(MethodAccessFlags::PRIVATE | MethodAccessFlags::STATIC)
//!     .code(|_, _| Ok(SyntheticCode::Cf(CfCode::new(0, 0, vec![CfInstruction::Return(None)]))))
//!     .build()?;
//! assert!(method.definition.is_empty_void_method());
//! # Ok::<(), cfshrink::Error>(())
//! ```

use crate::{
    code::{CfCode, CfInstruction},
    config::ClassFileVersion,
    ir::{code::IrCode, emitter::IrEmitter},
    program::{
        flags::MethodAccessFlags,
        optinfo::MethodOptimizationInfo,
        references::{MethodRef, ProtoRef, TypeRef},
        MethodDef,
    },
    Result,
};

/// Code produced by a synthetic method generator.
#[derive(Debug, Clone)]
pub enum SyntheticCode {
    /// Stack-machine code, used as is
    Cf(CfCode),
    /// IR, emitted to stack-machine code by the builder
    Ir(IrCode),
}

/// Generator closure: receives the final method reference and whether it is static.
type CodeGenerator = Box<dyn FnOnce(&MethodRef, bool) -> Result<SyntheticCode> + Send>;

/// A generated method.
#[derive(Debug, Clone)]
pub struct SyntheticMethod {
    /// The definition, with the `SYNTHETIC` flag set
    pub definition: MethodDef,
    /// The IR the code was emitted from, if the generator produced IR
    pub ir: Option<IrCode>,
    /// Initial optimization info
    pub optimization_info: MethodOptimizationInfo,
}

/// Builder for [`SyntheticMethod`]s.
pub struct SyntheticMethodBuilder {
    holder: TypeRef,
    name: Option<String>,
    proto: Option<ProtoRef>,
    access: MethodAccessFlags,
    version: ClassFileVersion,
    keep_v50_frames: bool,
    generator: Option<CodeGenerator>,
    optimization_info: MethodOptimizationInfo,
}

impl SyntheticMethodBuilder {
    /// Starts a method on `holder`. The default access is `public`.
    #[must_use]
    pub fn new(holder: TypeRef) -> Self {
        SyntheticMethodBuilder {
            holder,
            name: None,
            proto: None,
            access: MethodAccessFlags::PUBLIC,
            version: ClassFileVersion::default(),
            keep_v50_frames: false,
            generator: None,
            optimization_info: MethodOptimizationInfo::default(),
        }
    }

    /// Sets the method name.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Sets the prototype.
    #[must_use]
    pub fn proto(mut self, proto: ProtoRef) -> Self {
        self.proto = Some(proto);
        self
    }

    /// Sets the access flags. `SYNTHETIC` is always added.
    #[must_use]
    pub fn access(mut self, access: MethodAccessFlags) -> Self {
        self.access = access;
        self
    }

    /// Class-file version of the holder; decides whether emitted IR gets stack map frames.
    #[must_use]
    pub fn version(mut self, version: ClassFileVersion, keep_v50_frames: bool) -> Self {
        self.version = version;
        self.keep_v50_frames = keep_v50_frames;
        self
    }

    /// Sets the code generator.
    #[must_use]
    pub fn code<F>(mut self, generator: F) -> Self
    where
        F: FnOnce(&MethodRef, bool) -> Result<SyntheticCode> + Send + 'static,
    {
        self.generator = Some(Box::new(generator));
        self
    }

    /// Sets the initial optimization info.
    #[must_use]
    pub fn optimization_info(mut self, info: MethodOptimizationInfo) -> Self {
        self.optimization_info = info;
        self
    }

    /// Generates the code and validates the method.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the name or prototype is missing, if code is
    /// missing for a concrete method or present for an abstract or native one, or if the
    /// generated code does not fit the prototype. Errors of the generator and of the IR
    /// consistency check are returned unchanged.
    pub fn build(self) -> Result<SyntheticMethod> {
        let name = self
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| malformed_error!("synthetic method on {} has no name", self.holder))?;
        let proto = self
            .proto
            .ok_or_else(|| malformed_error!("synthetic method {}.{} has no prototype", self.holder, name))?;
        let reference = MethodRef::new(self.holder, &name, proto);
        let access = self.access | MethodAccessFlags::SYNTHETIC;
        let bodiless = access.is_abstract() || access.is_native();

        let mut definition = MethodDef::new(reference.clone(), access);
        let mut ir = None;
        match (self.generator, bodiless) {
            (Some(_), true) => {
                return Err(malformed_error!(
                    "abstract or native synthetic method {} must not have code",
                    reference
                ))
            }
            (None, false) => {
                return Err(malformed_error!("synthetic method {} has no code", reference))
            }
            (None, true) => {}
            (Some(generator), false) => {
                let code = match generator(&reference, access.is_static())? {
                    SyntheticCode::Cf(code) => code,
                    SyntheticCode::Ir(code) => {
                        check_ir(&definition, &code)?;
                        let emitted = IrEmitter::new(&code)
                            .with_frames(self.version, self.keep_v50_frames)
                            .emit()?;
                        ir = Some(code);
                        emitted
                    }
                };
                check_cf(&definition, &code)?;
                definition = definition.with_code(code);
            }
        }

        log::trace!("synthesized {}", reference);
        Ok(SyntheticMethod {
            definition,
            ir,
            optimization_info: self.optimization_info,
        })
    }
}

fn check_ir(method: &MethodDef, code: &IrCode) -> Result<()> {
    if code.method() != &method.reference || code.is_static() != method.is_static() {
        return Err(malformed_error!(
            "IR for {} was generated for {}",
            method.reference,
            code.method()
        ));
    }
    let expected = method.parameter_info().argument_count();
    let actual = code.arguments().len();
    if actual != expected {
        return Err(malformed_error!(
            "IR for {} defines {} arguments, expected {}",
            method.reference,
            actual,
            expected
        ));
    }
    code.validate()
}

fn check_cf(method: &MethodDef, code: &CfCode) -> Result<()> {
    let slots = method.parameter_info().slot_count();
    if usize::from(code.max_locals) < slots {
        return Err(malformed_error!(
            "code of {} has {} locals, arguments need {}",
            method.reference,
            code.max_locals,
            slots
        ));
    }
    let return_type = method.reference.proto.return_type();
    let expected = (!return_type.is_void()).then(|| return_type.kind());
    for instruction in &code.instructions {
        if let CfInstruction::Return(kind) = instruction {
            if *kind != expected {
                return Err(malformed_error!(
                    "{} returns {:?}, found return of {:?}",
                    method.reference,
                    expected,
                    kind
                ));
            }
        }
    }
    if !code.instructions.iter().any(CfInstruction::is_terminator) {
        return Err(malformed_error!("code of {} never terminates", method.reference));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{block::BlockId, instruction::IrInstruction, instruction::IrOp, types::TypeElement},
        program::descriptor::ValueKind,
    };

    fn holder() -> TypeRef {
        TypeRef::class("app/Holder")
    }

    #[test]
    fn test_requires_name_and_proto() {
        let missing_name = SyntheticMethodBuilder::new(holder())
            .proto(ProtoRef::parse("()V").unwrap())
            .build();
        assert!(missing_name.is_err());

        let missing_proto = SyntheticMethodBuilder::new(holder()).name("m").build();
        assert!(missing_proto.is_err());
    }

    #[test]
    fn test_abstract_without_code() {
        let method = SyntheticMethodBuilder::new(holder())
            .name("m")
            .proto(ProtoRef::parse("()I").unwrap())
            .access(MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT)
            .build()
            .unwrap();
        assert!(method.definition.code.is_none());
        assert!(method.definition.access.contains(MethodAccessFlags::SYNTHETIC));

        let with_code = SyntheticMethodBuilder::new(holder())
            .name("m")
            .proto(ProtoRef::parse("()V").unwrap())
            .access(MethodAccessFlags::ABSTRACT)
            .code(|_, _| Ok(SyntheticCode::Cf(CfCode::new(0, 1, vec![CfInstruction::Return(None)]))))
            .build();
        assert!(with_code.is_err());
    }

    #[test]
    fn test_return_kind_checked() {
        let result = SyntheticMethodBuilder::new(holder())
            .name("m")
            .proto(ProtoRef::parse("()I").unwrap())
            .code(|_, _| Ok(SyntheticCode::Cf(CfCode::new(0, 1, vec![CfInstruction::Return(None)]))))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_ir_generator_is_emitted() {
        let method = SyntheticMethodBuilder::new(holder())
            .name("identity")
            .proto(ProtoRef::parse("(I)I").unwrap())
            .access(MethodAccessFlags::STATIC)
            .code(|reference, is_static| {
                let mut ir = IrCode::new(reference.clone(), is_static);
                let entry = ir.add_block();
                let argument = ir.new_value(TypeElement::Int);
                let block = ir.block_mut(entry).unwrap();
                block
                    .instructions
                    .push(IrInstruction::with_out(argument, IrOp::Argument(0)));
                block
                    .instructions
                    .push(IrInstruction::new(IrOp::Return(Some(argument))));
                Ok(SyntheticCode::Ir(ir))
            })
            .build()
            .unwrap();

        assert_eq!(method.ir.as_ref().unwrap().entry(), BlockId::new(0));
        let code = method.definition.code.as_ref().unwrap();
        assert!(code.instructions.contains(&CfInstruction::Load {
            kind: ValueKind::Int,
            local: 0
        }));
        assert_eq!(
            code.instructions.iter().rev().find(|i| i.is_terminator()),
            Some(&CfInstruction::Return(Some(ValueKind::Int)))
        );
    }

    #[test]
    fn test_ir_for_wrong_method_rejected() {
        let result = SyntheticMethodBuilder::new(holder())
            .name("m")
            .proto(ProtoRef::parse("()V").unwrap())
            .code(|_, _| {
                let other = MethodRef::parse("app/Other", "m", "()V")?;
                let mut ir = IrCode::new(other, false);
                let entry = ir.add_block();
                let this = ir.new_value(TypeElement::non_null(&TypeRef::class("app/Other")));
                let block = ir.block_mut(entry).unwrap();
                block
                    .instructions
                    .push(IrInstruction::with_out(this, IrOp::Argument(0)));
                block.instructions.push(IrInstruction::new(IrOp::Return(None)));
                Ok(SyntheticCode::Ir(ir))
            })
            .build();
        assert!(result.is_err());
    }
}
