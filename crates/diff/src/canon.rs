//! # Structural Keys
//!
//! A structural key is a token stream describing a node up to the names of
//! its internal edges. Contracted and consumed edges become binder numbers,
//! free edges become positional holes:
//!
//! ```text
//!   A_ij x_j      →  Product:2 ( var:A/i,j  H0 B0 ) ( var:x/j  B0 )
//!   A_ik x_k      →  the same stream
//! ```
//!
//! Equal streams imply equal tensors (up to a renaming of the free edges for
//! [`equivalent`]). The converse does not hold: factor order is normalized
//! by sorting, which does not catch every symmetry.

use std::collections::HashMap;
use std::rc::Rc;

use tensorgrad_core::{CoreError, Edge, Expr, ExprGraph, Invariant, Memo, NodeId};

use crate::error::DiffError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Token {
    Atom(String),
    /// The n-th free edge of the node being described.
    Hole(usize),
    /// The n-th internal edge.
    Bound(usize),
    /// A free edge, by name.
    Named(Edge),
}

/// Canonical form of one node: tokens plus the edge each hole stands for.
#[derive(Debug, Clone)]
struct Template {
    tokens: Vec<Token>,
    order: Vec<Edge>,
    bound: usize,
}

impl Template {
    fn leaf(head: String, order: Vec<Edge>) -> Self {
        let mut tokens = vec![Token::Atom(head)];
        tokens.extend((0..order.len()).map(Token::Hole));
        Self {
            tokens,
            order,
            bound: 0,
        }
    }

    /// Edges in the order their holes appear in the token stream.
    fn hole_edges(&self) -> impl Iterator<Item = &Edge> {
        self.tokens.iter().filter_map(|t| match t {
            Token::Hole(h) => self.order.get(*h),
            _ => None,
        })
    }

    /// Append this template's tokens to `out`, translating holes through
    /// `edges` and shifting binders by `base`.
    fn splice(
        &self,
        out: &mut Vec<Token>,
        edges: &HashMap<Edge, Token>,
        base: usize,
        node: NodeId,
    ) -> Result<(), CoreError> {
        out.push(open());
        for t in &self.tokens {
            out.push(match t {
                Token::Hole(h) => {
                    let edge = &self.order[*h];
                    edges.get(edge).cloned().ok_or_else(|| CoreError::EdgeNotFound {
                        edge: edge.clone(),
                        node: node.index(),
                    })?
                }
                Token::Bound(b) => Token::Bound(base + b),
                other => other.clone(),
            });
        }
        out.push(close());
        Ok(())
    }
}

fn open() -> Token {
    Token::Atom("(".to_string())
}

fn close() -> Token {
    Token::Atom(")".to_string())
}

fn join(edges: &[Edge]) -> String {
    edges
        .iter()
        .map(Edge::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// Memoized structural keys over one graph.
///
/// Nodes are immutable, so one `Canon` stays valid for the lifetime of the
/// graph it was used with.
#[derive(Debug, Default)]
pub struct Canon {
    templates: Memo<Rc<Template>>,
}

impl Canon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key with free edges by name; equal keys mean equal tensors.
    pub fn structural_key(&mut self, graph: &ExprGraph, node: NodeId) -> Result<Vec<Token>, CoreError> {
        let template = self.template(graph, node)?;
        Ok(template
            .tokens
            .iter()
            .map(|t| match t {
                Token::Hole(h) => Token::Named(template.order[*h].clone()),
                other => other.clone(),
            })
            .collect())
    }

    /// Key with free edges as positional holes.
    fn shape_key(&mut self, graph: &ExprGraph, node: NodeId) -> Result<Vec<Token>, CoreError> {
        Ok(self.template(graph, node)?.tokens.clone())
    }

    fn template(&mut self, graph: &ExprGraph, id: NodeId) -> Result<Rc<Template>, CoreError> {
        if let Some(done) = self.templates.get(id) {
            return Ok(done);
        }
        self.templates.enter(id)?;
        let node = graph.node(id)?;
        let template = match &node.expr {
            Expr::Variable { name, original } => {
                Template::leaf(format!("var:{name}/{}", join(original)), node.edges.clone())
            }
            Expr::Copy | Expr::Zero | Expr::Ones => {
                let mut order = node.edges.clone();
                order.sort();
                Template::leaf(format!("{}:{}", node.kind(), order.len()), order)
            }
            Expr::Sum { terms } => {
                let mut order = node.edges.clone();
                order.sort();
                let holes: HashMap<Edge, Token> = order
                    .iter()
                    .enumerate()
                    .map(|(h, e)| (e.clone(), Token::Hole(h)))
                    .collect();
                let mut bound = 0;
                let mut parts = Vec::with_capacity(terms.len());
                for &(c, t) in terms {
                    let child = self.template(graph, t)?;
                    let mut part = vec![Token::Atom(c.to_string())];
                    child
                        .splice(&mut part, &holes, 0, id)
                        .map_err(|_| stray_term_edge(id))?;
                    bound = bound.max(child.bound);
                    parts.push(part);
                }
                parts.sort();
                let mut tokens = vec![Token::Atom(format!("Sum:{}", parts.len()))];
                tokens.extend(parts.into_iter().flatten());
                Template {
                    tokens,
                    order,
                    bound,
                }
            }
            Expr::Product { factors } => {
                let mut children = Vec::with_capacity(factors.len());
                for &f in factors {
                    children.push(self.template(graph, f)?);
                }
                children.sort_by(|a, b| a.tokens.cmp(&b.tokens));

                let mut order: Vec<Edge> = Vec::new();
                let mut contracted: HashMap<Edge, Token> = HashMap::new();
                let mut bound = 0;
                let mut tokens = vec![Token::Atom(format!("Product:{}", children.len()))];
                for child in &children {
                    let base = bound;
                    bound += child.bound;
                    let mut local: HashMap<Edge, Token> = HashMap::new();
                    for e in child.hole_edges() {
                        if local.contains_key(e) {
                            continue;
                        }
                        let token = if node.edges.contains(e) {
                            order.push(e.clone());
                            Token::Hole(order.len() - 1)
                        } else {
                            contracted
                                .entry(e.clone())
                                .or_insert_with(|| {
                                    bound += 1;
                                    Token::Bound(bound - 1)
                                })
                                .clone()
                        };
                        local.insert(e.clone(), token);
                    }
                    child.splice(&mut tokens, &local, base, id)?;
                }
                Template {
                    tokens,
                    order,
                    bound,
                }
            }
            Expr::Function(call) => {
                let order = node.edges.clone();
                let mut tokens = vec![Token::Atom(format!(
                    "fn:{}:{}",
                    call.name,
                    call.output_edges.len()
                ))];
                tokens.extend((0..call.output_edges.len()).map(Token::Hole));

                let mut bound: usize = call.input_edges.iter().map(Vec::len).sum();
                let mut first_binder = 0;
                for (&input, consumed) in call.inputs.iter().zip(&call.input_edges) {
                    let child = self.template(graph, input)?;
                    let mut local: HashMap<Edge, Token> = consumed
                        .iter()
                        .enumerate()
                        .map(|(j, e)| (e.clone(), Token::Bound(first_binder + j)))
                        .collect();
                    for e in &child.order {
                        if !local.contains_key(e) {
                            let h = order.iter().position(|o| o == e).ok_or_else(|| {
                                CoreError::EdgeNotFound {
                                    edge: e.clone(),
                                    node: id.index(),
                                }
                            })?;
                            local.insert(e.clone(), Token::Hole(h));
                        }
                    }
                    tokens.push(Token::Atom(format!("in:{}", consumed.len())));
                    tokens.extend((0..consumed.len()).map(|j| Token::Bound(first_binder + j)));
                    child.splice(&mut tokens, &local, bound, id)?;
                    first_binder += consumed.len();
                    bound += child.bound;
                }
                Template {
                    tokens,
                    order,
                    bound,
                }
            }
        };
        Ok(self.templates.finish(id, Rc::new(template)))
    }
}

fn stray_term_edge(node: NodeId) -> CoreError {
    CoreError::InvariantViolation {
        rule: Invariant::SumEdgeSets,
        detail: format!("a term of sum {} exposes an edge the sum does not", node.index()),
    }
}

/// Structural key of `node`, free edges by name.
pub fn structural_key(graph: &ExprGraph, node: NodeId) -> Result<Vec<Token>, DiffError> {
    Ok(Canon::new().structural_key(graph, node)?)
}

/// Whether `a` and `b` are the same tensor up to the names of their edges.
///
/// ```rust
/// use tensorgrad_core::{edges, ExprGraph};
/// use tensorgrad_diff::canon::equivalent;
///
/// let mut g = ExprGraph::new();
/// let a = g.variable("A", edges(["i", "j"])).unwrap();
/// let x = g.variable("x", edges(["j"])).unwrap();
/// let ax = g.contract(vec![a, x]).unwrap();
/// let xa = g.contract(vec![x, a]).unwrap();
/// assert!(equivalent(&g, ax, xa).unwrap());
/// ```
pub fn equivalent(graph: &ExprGraph, a: NodeId, b: NodeId) -> Result<bool, DiffError> {
    let mut canon = Canon::new();
    Ok(canon.shape_key(graph, a)? == canon.shape_key(graph, b)?)
}
