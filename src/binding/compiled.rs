//! Theory expressions resolved for one block.
//!
//! Compilation looks up every leaf function, checks its argument count and
//! resolves each argument reference to a [`Source`]. Evaluation then only
//! gathers values and walks the tree.

use std::sync::Arc;

use crate::binding::{BindingContext, BindingError, ParamRef, Source};
use crate::theory::{
    GlobalPart, GlobalPartCache, TheoryExpression, TheoryFunction, TheoryOp, TheoryRegistry,
};

/// A leaf with its function and resolved arguments.
#[derive(Clone)]
pub struct CompiledLeaf {
    pub function: Arc<dyn TheoryFunction>,
    pub sources: Vec<Source>,
}

impl std::fmt::Debug for CompiledLeaf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledLeaf")
            .field("function", &self.function.name())
            .field("sources", &self.sources)
            .finish()
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(usize),
    Binary(TheoryOp, Box<Node>, Box<Node>),
}

/// A theory expression bound to one block.
#[derive(Debug, Clone)]
pub struct CompiledTheory {
    leaves: Vec<CompiledLeaf>,
    offsets: Vec<usize>,
    root: Node,
    functions_used: Vec<usize>,
}

impl CompiledTheory {
    /// Resolve `expr` in `ctx`.
    ///
    /// # Errors
    ///
    /// Unknown function names, argument counts the function does not accept,
    /// `-1` in a slot without default and any out-of-range reference.
    pub fn compile(
        expr: &TheoryExpression,
        registry: &TheoryRegistry,
        ctx: &BindingContext<'_>,
    ) -> Result<Self, BindingError> {
        let mut leaves = Vec::new();
        let root = Self::compile_node(expr, registry, ctx, &mut leaves)?;

        let mut offsets = Vec::with_capacity(leaves.len() + 1);
        let mut offset = 0;
        for leaf in &leaves {
            offsets.push(offset);
            offset += leaf.sources.len();
        }
        offsets.push(offset);

        let mut functions_used: Vec<usize> = leaves
            .iter()
            .flat_map(|leaf| leaf.sources.iter())
            .filter_map(|source| match source {
                Source::Function(i) => Some(i + 1),
                _ => None,
            })
            .collect();
        functions_used.sort_unstable();
        functions_used.dedup();

        Ok(Self {
            leaves,
            offsets,
            root,
            functions_used,
        })
    }

    fn compile_node(
        expr: &TheoryExpression,
        registry: &TheoryRegistry,
        ctx: &BindingContext<'_>,
        leaves: &mut Vec<CompiledLeaf>,
    ) -> Result<Node, BindingError> {
        match expr {
            TheoryExpression::Leaf(call) => {
                let function = registry.lookup(&call.function)?;
                let arity = function.arity();
                if !arity.accepts(call.args.len()) {
                    return Err(BindingError::ArityMismatch {
                        function: function.name().to_string(),
                        expected: arity.to_string(),
                        got: call.args.len(),
                    });
                }
                let sources = call
                    .args
                    .iter()
                    .enumerate()
                    .map(|(slot, &reference)| {
                        let default = match reference {
                            ParamRef::Default => function.default_value(slot),
                            _ => None,
                        };
                        let what = format!("{}({})", function.name(), function.argument_name(slot));
                        ctx.resolve(reference, default, &what, slot)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                leaves.push(CompiledLeaf { function, sources });
                Ok(Node::Leaf(leaves.len() - 1))
            }
            TheoryExpression::Binary(op, lhs, rhs) => {
                let lhs = Self::compile_node(lhs, registry, ctx, leaves)?;
                let rhs = Self::compile_node(rhs, registry, ctx, leaves)?;
                Ok(Node::Binary(*op, Box::new(lhs), Box::new(rhs)))
            }
        }
    }

    pub fn leaves(&self) -> &[CompiledLeaf] {
        &self.leaves
    }

    /// FUNCTIONS entries (1-based) this theory reads.
    pub fn functions_used(&self) -> &[usize] {
        &self.functions_used
    }

    /// Gather the argument values of all leaves into one flat buffer.
    pub fn resolve_into(&self, params: &[f64], functions: &[f64], out: &mut Vec<f64>) {
        out.clear();
        out.extend(
            self.leaves
                .iter()
                .flat_map(|leaf| leaf.sources.iter())
                .map(|source| source.value(params, functions)),
        );
    }

    /// Arguments of leaf `leaf` within a buffer filled by [`resolve_into`](Self::resolve_into).
    pub fn leaf_args<'a>(&self, args: &'a [f64], leaf: usize) -> &'a [f64] {
        &args[self.offsets[leaf]..self.offsets[leaf + 1]]
    }

    /// Refresh the global parts of all leaves for the current arguments.
    pub fn refresh_global_parts(&self, args: &[f64], cache: &GlobalPartCache) -> Vec<Option<GlobalPart>> {
        self.leaves
            .iter()
            .enumerate()
            .map(|(i, leaf)| cache.refresh(i, leaf.function.as_ref(), self.leaf_args(args, i)))
            .collect()
    }

    /// Value of the theory at time `t`.
    pub fn evaluate(&self, t: f64, args: &[f64], globals: &[Option<GlobalPart>]) -> f64 {
        self.evaluate_node(&self.root, t, args, globals)
    }

    fn evaluate_node(&self, node: &Node, t: f64, args: &[f64], globals: &[Option<GlobalPart>]) -> f64 {
        match node {
            Node::Leaf(i) => {
                let global = globals.get(*i).and_then(Option::as_ref);
                self.leaves[*i]
                    .function
                    .evaluate(t, self.leaf_args(args, *i), global)
            }
            Node::Binary(op, lhs, rhs) => op.apply(
                self.evaluate_node(lhs, t, args, globals),
                self.evaluate_node(rhs, t, args, globals),
            ),
        }
    }
}
