//! The relocatable object tuple the linker consumes (spec §6).
//!
//! Grounded on `original_source/asm/object.py`'s `Object`/`GlobalReloc`:
//! the Python version is a bare `namedtuple` of `(bytes, global_relocs,
//! local_relocs, globals)` with read-only accessors; this keeps the same
//! shape but as a named-field struct, and stores a word image (`Vec<u16>`)
//! rather than a byte buffer, since the vm16 target is word-addressable.

use std::collections::HashMap;

/// A reference to a symbol defined in another object, recorded at the word
/// position that must be patched once the symbol's final address is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalReloc {
    /// The referenced symbol's name.
    pub name: String,
    /// The word position, relative to the start of this object, to patch.
    pub pos: usize,
}

impl GlobalReloc {
    /// Creates a new global relocation.
    pub fn new(name: impl Into<String>, pos: usize) -> GlobalReloc {
        GlobalReloc { name: name.into(), pos }
    }
}

/// One compiled procedure (or a handful of them), ready for linking: a word
/// image plus the relocations and exported symbols needed to place it
/// alongside other objects.
#[derive(Debug, Clone, Default)]
pub struct Object {
    words: Vec<u16>,
    global_relocs: Vec<GlobalReloc>,
    local_relocs: Vec<usize>,
    globals: HashMap<String, usize>,
}

impl Object {
    /// Builds an object from its four constituent parts (spec §6's
    /// `(words, global_relocations, local_relocations, globals)` tuple).
    pub fn new(
        words: Vec<u16>,
        global_relocs: Vec<GlobalReloc>,
        local_relocs: Vec<usize>,
        globals: HashMap<String, usize>,
    ) -> Object {
        Object {
            words,
            global_relocs,
            local_relocs,
            globals,
        }
    }

    /// The object's word image.
    pub fn words(&self) -> &[u16] {
        &self.words
    }

    /// Every intra-object address this object contains, each the word
    /// position whose *value* (not the position itself) is an address
    /// local to this object and must be rebased when the object is placed
    /// at a nonzero offset.
    pub fn local_relocs(&self) -> &[usize] {
        &self.local_relocs
    }

    /// Every reference to a symbol defined elsewhere.
    pub fn global_relocs(&self) -> &[GlobalReloc] {
        &self.global_relocs
    }

    /// The symbols this object exports, each mapped to its word position
    /// relative to the start of this object.
    pub fn globals(&self) -> &HashMap<String, usize> {
        &self.globals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors_return_what_new_was_given() {
        let mut globals = HashMap::new();
        globals.insert("f".to_string(), 0);
        let obj = Object::new(
            vec![1, 2, 3],
            vec![GlobalReloc::new("g", 1)],
            vec![2],
            globals.clone(),
        );

        assert_eq!(obj.words(), &[1, 2, 3]);
        assert_eq!(obj.local_relocs(), &[2]);
        assert_eq!(obj.global_relocs(), &[GlobalReloc::new("g", 1)]);
        assert_eq!(obj.globals(), &globals);
    }
}
