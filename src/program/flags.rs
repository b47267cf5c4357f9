//! Access flags of classes, methods and fields.
//!
//! Bit values follow the class-file format (JVMS §4.1, §4.5, §4.6) so flags read from a class
//! file can be stored unchanged.

use bitflags::bitflags;

bitflags! {
    #[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Default)]
    /// Class access and property flags
    pub struct ClassAccessFlags: u16 {
        /// Declared public
        const PUBLIC = 0x0001;
        /// Declared final
        const FINAL = 0x0010;
        /// Treat superclass methods specially when invoked by invokespecial
        const SUPER = 0x0020;
        /// Is an interface
        const INTERFACE = 0x0200;
        /// Declared abstract
        const ABSTRACT = 0x0400;
        /// Not present in source code
        const SYNTHETIC = 0x1000;
        /// Declared as an annotation interface
        const ANNOTATION = 0x2000;
        /// Declared as an enum class
        const ENUM = 0x4000;
    }
}

bitflags! {
    #[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Default)]
    /// Method access and property flags
    pub struct MethodAccessFlags: u16 {
        /// Declared public
        const PUBLIC = 0x0001;
        /// Declared private
        const PRIVATE = 0x0002;
        /// Declared protected
        const PROTECTED = 0x0004;
        /// Declared static
        const STATIC = 0x0008;
        /// Declared final
        const FINAL = 0x0010;
        /// Invocation is wrapped by a monitor use
        const SYNCHRONIZED = 0x0020;
        /// A bridge method, generated by the compiler
        const BRIDGE = 0x0040;
        /// Declared with variable number of arguments
        const VARARGS = 0x0080;
        /// Declared native
        const NATIVE = 0x0100;
        /// Declared abstract
        const ABSTRACT = 0x0400;
        /// Declared strictfp
        const STRICT = 0x0800;
        /// Not present in source code
        const SYNTHETIC = 0x1000;
    }
}

bitflags! {
    #[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Default)]
    /// Field access and property flags
    pub struct FieldAccessFlags: u16 {
        /// Declared public
        const PUBLIC = 0x0001;
        /// Declared private
        const PRIVATE = 0x0002;
        /// Declared protected
        const PROTECTED = 0x0004;
        /// Declared static
        const STATIC = 0x0008;
        /// Declared final
        const FINAL = 0x0010;
        /// Declared volatile
        const VOLATILE = 0x0040;
        /// Declared transient
        const TRANSIENT = 0x0080;
        /// Not present in source code
        const SYNTHETIC = 0x1000;
        /// Declared as an element of an enum
        const ENUM = 0x4000;
    }
}

impl ClassAccessFlags {
    /// Returns `true` for interfaces (including annotation interfaces).
    #[must_use]
    pub fn is_interface(self) -> bool {
        self.contains(Self::INTERFACE)
    }

    /// Returns `true` for abstract classes and interfaces.
    #[must_use]
    pub fn is_abstract(self) -> bool {
        self.contains(Self::ABSTRACT)
    }

    /// Returns `true` if only classes of the same package can see this class.
    #[must_use]
    pub fn is_visibility_depending_on_package(self) -> bool {
        !self.contains(Self::PUBLIC)
    }
}

impl MethodAccessFlags {
    /// Returns `true` for static methods.
    #[must_use]
    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }

    /// Returns `true` for private methods.
    #[must_use]
    pub fn is_private(self) -> bool {
        self.contains(Self::PRIVATE)
    }

    /// Returns `true` for abstract methods.
    #[must_use]
    pub fn is_abstract(self) -> bool {
        self.contains(Self::ABSTRACT)
    }

    /// Returns `true` for synchronized methods.
    #[must_use]
    pub fn is_synchronized(self) -> bool {
        self.contains(Self::SYNCHRONIZED)
    }

    /// Returns `true` for native methods.
    #[must_use]
    pub fn is_native(self) -> bool {
        self.contains(Self::NATIVE)
    }

    /// Returns `true` for package-private and protected methods.
    #[must_use]
    pub fn is_visibility_depending_on_package(self) -> bool {
        !self.intersects(Self::PUBLIC | Self::PRIVATE)
    }

    /// Returns `true` for package-private methods (no visibility modifier).
    #[must_use]
    pub fn is_package_private(self) -> bool {
        !self.intersects(Self::PUBLIC | Self::PRIVATE | Self::PROTECTED)
    }
}

impl FieldAccessFlags {
    /// Returns `true` for static fields.
    #[must_use]
    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }

    /// Returns `true` for final fields.
    #[must_use]
    pub fn is_final(self) -> bool {
        self.contains(Self::FINAL)
    }

    /// Returns `true` for volatile fields.
    #[must_use]
    pub fn is_volatile(self) -> bool {
        self.contains(Self::VOLATILE)
    }

    /// Returns `true` for package-private and protected fields.
    #[must_use]
    pub fn is_visibility_depending_on_package(self) -> bool {
        !self.intersects(Self::PUBLIC | Self::PRIVATE)
    }
}

/// Access flags of any definition kind, as reported to trace consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessFlags {
    /// Flags of a class
    Class(ClassAccessFlags),
    /// Flags of a field
    Field(FieldAccessFlags),
    /// Flags of a method
    Method(MethodAccessFlags),
}

impl AccessFlags {
    /// Returns `true` if the definition is public.
    #[must_use]
    pub fn is_public(self) -> bool {
        match self {
            AccessFlags::Class(f) => f.contains(ClassAccessFlags::PUBLIC),
            AccessFlags::Field(f) => f.contains(FieldAccessFlags::PUBLIC),
            AccessFlags::Method(f) => f.contains(MethodAccessFlags::PUBLIC),
        }
    }

    /// Returns `true` if the definition is static. Classes are never static here.
    #[must_use]
    pub fn is_static(self) -> bool {
        match self {
            AccessFlags::Class(_) => false,
            AccessFlags::Field(f) => f.is_static(),
            AccessFlags::Method(f) => f.is_static(),
        }
    }

    /// Returns `true` if visibility of the definition depends on its package.
    #[must_use]
    pub fn is_visibility_depending_on_package(self) -> bool {
        match self {
            AccessFlags::Class(f) => f.is_visibility_depending_on_package(),
            AccessFlags::Field(f) => f.is_visibility_depending_on_package(),
            AccessFlags::Method(f) => f.is_visibility_depending_on_package(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_dependent_visibility() {
        assert!(MethodAccessFlags::empty().is_visibility_depending_on_package());
        assert!(MethodAccessFlags::PROTECTED.is_visibility_depending_on_package());
        assert!(!MethodAccessFlags::PUBLIC.is_visibility_depending_on_package());
        assert!(!MethodAccessFlags::PRIVATE.is_visibility_depending_on_package());
        assert!(ClassAccessFlags::FINAL.is_visibility_depending_on_package());
        assert!(!AccessFlags::Class(ClassAccessFlags::PUBLIC).is_visibility_depending_on_package());
    }

    #[test]
    fn test_raw_bits_roundtrip() {
        let flags = MethodAccessFlags::from_bits_truncate(0x0029);
        assert!(flags.contains(MethodAccessFlags::PUBLIC));
        assert!(flags.is_static());
        assert!(flags.is_synchronized());
    }
}
