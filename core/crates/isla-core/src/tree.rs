//! Derivation trees (§3).
//!
//! Immutable-by-rewrite n-ary trees with stable node identities. Node ids
//! are minted from a process-wide monotonic counter (the teacher's
//! `model_checker.rs` uses the same `StateId = u64` shape for its state
//! space; §9's "global state" guidance asks for write-once memoization
//! rather than implicit mutation, which a monotonic allocator satisfies).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::variable::Variable;

/// Stable, process-unique node identity (§3 invariant (i)).
pub type NodeId = u64;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

fn fresh_id() -> NodeId {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

/// A position in a tree: an ordered sequence of child indices from the
/// root. The empty path denotes the root itself.
pub type Path = Vec<usize>;

/// What a tree node stands for: a grammar nonterminal, a terminal
/// literal, or a placeholder for a bound/fresh variable's own subtree
/// (§3 — used by existential tree insertion, §4.5, to mark exactly which
/// leaf stands for a freshly introduced constant).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Symbol {
    Nonterminal(String),
    Terminal(String),
    Variable(Variable),
}

impl Symbol {
    pub fn nonterminal(name: impl Into<String>) -> Self {
        Symbol::Nonterminal(name.into())
    }

    pub fn terminal(text: impl Into<String>) -> Self {
        Symbol::Terminal(text.into())
    }

    /// The nonterminal type this symbol would be expanded or matched
    /// against, if any.
    pub fn n_type(&self) -> Option<&str> {
        match self {
            Symbol::Nonterminal(name) => Some(name.as_str()),
            Symbol::Terminal(_) => None,
            Symbol::Variable(v) => Some(v.n_type()),
        }
    }

    pub fn is_nonterminal(&self) -> bool {
        matches!(self, Symbol::Nonterminal(_))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Nonterminal(n) => write!(f, "{n}"),
            Symbol::Terminal(t) => write!(f, "{t:?}"),
            Symbol::Variable(v) => write!(f, "{}", v.name()),
        }
    }
}

#[derive(Debug)]
struct TreeNode {
    id: NodeId,
    symbol: Symbol,
    /// `None` means "open": a nonterminal or variable leaf not yet
    /// expanded. `Some(children)` means the node has been expanded (a
    /// terminal always carries `Some(vec![])`).
    children: Option<Vec<DerivationTree>>,
}

/// An immutable-by-rewrite derivation tree. Cloning is cheap (an `Arc`
/// bump); "mutation" is always a [`DerivationTree::replace`] producing a
/// new tree that structurally shares untouched subtrees (§3 invariant
/// (ii), §8: "subtrees at paths disjoint from p are preserved by
/// identity").
#[derive(Debug, Clone)]
pub struct DerivationTree(Arc<TreeNode>);

impl DerivationTree {
    /// An open leaf: `symbol` is a nonterminal or variable placeholder,
    /// no children yet.
    pub fn leaf(symbol: Symbol) -> Self {
        DerivationTree(Arc::new(TreeNode {
            id: fresh_id(),
            symbol,
            children: None,
        }))
    }

    /// A complete terminal node (§4.7: "terminals become terminal nodes
    /// with empty children").
    pub fn terminal(text: impl Into<String>) -> Self {
        DerivationTree(Arc::new(TreeNode {
            id: fresh_id(),
            symbol: Symbol::terminal(text),
            children: Some(Vec::new()),
        }))
    }

    /// An inner node with already-determined children.
    pub fn inner(symbol: Symbol, children: Vec<DerivationTree>) -> Self {
        DerivationTree(Arc::new(TreeNode {
            id: fresh_id(),
            symbol,
            children: Some(children),
        }))
    }

    pub fn id(&self) -> NodeId {
        self.0.id
    }

    pub fn symbol(&self) -> &Symbol {
        &self.0.symbol
    }

    pub fn children(&self) -> Option<&[DerivationTree]> {
        self.0.children.as_deref()
    }

    /// "Open" leaf per §3: symbol is a nonterminal or variable
    /// placeholder and there are no children yet.
    pub fn is_open(&self) -> bool {
        self.0.children.is_none()
    }

    /// "Concrete" leaf per §3: an open leaf whose symbol is a genuine
    /// grammar nonterminal, not a variable placeholder.
    pub fn is_open_concrete(&self) -> bool {
        self.is_open() && matches!(self.0.symbol, Symbol::Nonterminal(_))
    }

    pub fn is_open_variable(&self) -> bool {
        self.is_open() && matches!(self.0.symbol, Symbol::Variable(_))
    }

    /// "Complete": no open leaves anywhere in the tree.
    pub fn is_complete(&self) -> bool {
        match &self.0.children {
            None => false,
            Some(children) => children.iter().all(DerivationTree::is_complete),
        }
    }

    /// Look up the subtree at `path`, if it exists.
    pub fn get(&self, path: &[usize]) -> Option<&DerivationTree> {
        let mut current = self;
        for &idx in path {
            current = current.0.children.as_deref()?.get(idx)?;
        }
        Some(current)
    }

    /// Replace the subtree at `path` with `new_subtree`, returning a new
    /// tree. Ancestors along the path are rebuilt (and so receive fresh
    /// ids); subtrees outside the path are shared unchanged (§8: `get
    /// (replace(t, p, t'), p) == t'`; siblings preserved by identity).
    ///
    /// Panics if `path` does not address an existing node — callers are
    /// expected to only replace at paths obtained from this same tree
    /// (programmer error per §7, "fail fast").
    pub fn replace(&self, path: &[usize], new_subtree: DerivationTree) -> DerivationTree {
        match path.split_first() {
            None => new_subtree,
            Some((&idx, rest)) => {
                let children = self
                    .0
                    .children
                    .as_ref()
                    .expect("replace: path runs through an open leaf");
                let mut new_children = children.clone();
                new_children[idx] = children[idx].replace(rest, new_subtree);
                DerivationTree::inner(self.0.symbol.clone(), new_children)
            }
        }
    }

    /// Preorder walk over every node, yielding its path alongside it.
    pub fn walk(&self) -> Vec<(Path, DerivationTree)> {
        let mut out = Vec::new();
        self.walk_into(Path::new(), &mut out);
        out
    }

    fn walk_into(&self, prefix: Path, out: &mut Vec<(Path, DerivationTree)>) {
        out.push((prefix.clone(), self.clone()));
        if let Some(children) = &self.0.children {
            for (i, child) in children.iter().enumerate() {
                let mut child_path = prefix.clone();
                child_path.push(i);
                child.walk_into(child_path, out);
            }
        }
    }

    /// Every open leaf (concrete or variable placeholder), with its path.
    pub fn open_leaves(&self) -> Vec<(Path, DerivationTree)> {
        self.walk()
            .into_iter()
            .filter(|(_, t)| t.is_open())
            .collect()
    }

    /// Every open leaf whose symbol is an ordinary grammar nonterminal
    /// (used by §4.7 expansion, which never touches variable
    /// placeholders directly).
    pub fn open_concrete_leaves(&self) -> Vec<(Path, DerivationTree)> {
        self.walk()
            .into_iter()
            .filter(|(_, t)| t.is_open_concrete())
            .collect()
    }

    /// Locate the (unique, by construction) leaf standing for `variable`,
    /// if one was inserted via §4.5.
    pub fn find_variable(&self, variable: &Variable) -> Option<Path> {
        self.walk().into_iter().find_map(|(path, t)| match t.symbol() {
            Symbol::Variable(v) if v == variable => Some(path),
            _ => None,
        })
    }

    /// Left-to-right concatenation of terminal symbols (§3 invariant
    /// (iii)). Open leaves contribute nothing — the yield of an
    /// incomplete tree is necessarily partial.
    pub fn yield_str(&self) -> String {
        let mut out = String::new();
        self.yield_into(&mut out);
        out
    }

    fn yield_into(&self, out: &mut String) {
        match &self.0.children {
            None => {}
            Some(children) if children.is_empty() => {
                if let Symbol::Terminal(text) = &self.0.symbol {
                    out.push_str(text);
                }
            }
            Some(children) => {
                for child in children {
                    child.yield_into(out);
                }
            }
        }
    }
}

impl PartialEq for DerivationTree {
    /// Structural equality (§2: `SolutionState`s are deduplicated
    /// structurally) — node identity is deliberately not part of the
    /// comparison, since two independently expanded trees of identical
    /// shape must compare equal.
    fn eq(&self, other: &Self) -> bool {
        self.0.symbol == other.0.symbol && self.0.children == other.0.children
    }
}

impl Eq for DerivationTree {}

impl std::hash::Hash for DerivationTree {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.symbol.hash(state);
        self.0.children.hash(state);
    }
}
