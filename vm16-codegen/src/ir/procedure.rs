//! The input handed to the core by the front end: a linear IR procedure.

use crate::ir::{Instruction, VarId};

/// A front-end-supplied procedure: a name, a parameter list (each
/// parameter names a base variable id), a linear instruction body, and
/// whether the symbol is externally visible.
#[derive(Debug, Clone)]
pub struct Procedure {
    name: String,
    parameters: Vec<VarId>,
    body: Vec<Instruction>,
    exported: bool,
}

impl Procedure {
    /// Creates an empty procedure with the given name.
    pub fn new(name: impl Into<String>) -> Procedure {
        Procedure {
            name: name.into(),
            parameters: Vec::new(),
            body: Vec::new(),
            exported: false,
        }
    }

    /// Marks this procedure as exported (visible to the linker as a global
    /// symbol).
    pub fn set_exported(&mut self) {
        self.exported = true;
    }

    /// Whether this procedure is exported.
    pub fn is_exported(&self) -> bool {
        self.exported
    }

    /// The procedure's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The procedure's parameters, in call order.
    pub fn parameters(&self) -> &[VarId] {
        &self.parameters
    }

    /// Appends a parameter.
    pub fn push_parameter(&mut self, var: VarId) {
        self.parameters.push(var);
    }

    /// The procedure's linear instruction body.
    pub fn body(&self) -> &[Instruction] {
        &self.body
    }

    /// Appends instructions to the body, in order.
    pub fn extend_body(&mut self, insts: impl IntoIterator<Item = Instruction>) {
        self.body.extend(insts);
    }
}
