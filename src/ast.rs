//! Abstract Syntax Tree (AST) for C-Accel
//!
//! The tree is deliberately uniform: every node has a kind, a string payload,
//! the source line, owned children and a string attribute map. Child layout per
//! kind is documented on [`NodeKind`]; the generator checks arity before it
//! reads a child.

use std::collections::BTreeMap;
use std::fmt;

/// Closed set of node kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Root: top-level declarations and directives
    Program,
    /// `#import "module"`, value is the module name
    Import,
    /// `exec(...)`: children are parameter expressions or keyword Assignments
    Exec,
    /// `func(Type) = "name" { }`: value is the name (or the type when anonymous),
    /// attribute `type`, single Block child
    FunctionDecl,
    /// `class(Type) = "name" { }`: ObjectSection and MemberSection children
    ClassDecl,
    /// Field identifiers of a class
    ObjectSection,
    /// Method declarations of a class
    MemberSection,
    Block,
    /// value is the target name. Children: `[value]` or `[index, value]` when
    /// attribute `indexed` is set
    Assignment,
    VarDecl,
    /// `vector<T> name`: value is the name, attribute `elementType`
    VectorDecl,
    /// `[condition, then]` or `[condition, then, else]`
    If,
    /// `[condition, body]`
    While,
    /// `[init, condition, increment, body]` or `[RangeFor, body]`
    For,
    /// value is the loop variable, single iterable child
    RangeFor,
    /// Zero or one child
    Return,
    Print,
    /// value is the operator, `[lhs, rhs]`
    BinaryOp,
    /// value is the operator (`++post`/`--post` for postfix forms)
    UnaryOp,
    /// value is the callee; method calls carry the receiver as first child
    FunctionCall,
    MemberAccess,
    /// `[base, index]`
    ArrayAccess,
    ArrayLiteral,
    Literal,
    Identifier,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Program => "Program",
            NodeKind::Import => "Import",
            NodeKind::Exec => "Exec",
            NodeKind::FunctionDecl => "FunctionDecl",
            NodeKind::ClassDecl => "ClassDecl",
            NodeKind::ObjectSection => "ObjectSection",
            NodeKind::MemberSection => "MemberSection",
            NodeKind::Block => "Block",
            NodeKind::Assignment => "Assignment",
            NodeKind::VarDecl => "VarDecl",
            NodeKind::VectorDecl => "VectorDecl",
            NodeKind::If => "If",
            NodeKind::While => "While",
            NodeKind::For => "For",
            NodeKind::RangeFor => "RangeFor",
            NodeKind::Return => "Return",
            NodeKind::Print => "Print",
            NodeKind::BinaryOp => "BinaryOp",
            NodeKind::UnaryOp => "UnaryOp",
            NodeKind::FunctionCall => "FunctionCall",
            NodeKind::MemberAccess => "MemberAccess",
            NodeKind::ArrayAccess => "ArrayAccess",
            NodeKind::ArrayLiteral => "ArrayLiteral",
            NodeKind::Literal => "Literal",
            NodeKind::Identifier => "Identifier",
        }
    }

    pub fn is_statement(&self) -> bool {
        matches!(
            self,
            NodeKind::Assignment
                | NodeKind::VarDecl
                | NodeKind::VectorDecl
                | NodeKind::If
                | NodeKind::While
                | NodeKind::For
                | NodeKind::RangeFor
                | NodeKind::Return
                | NodeKind::Print
        )
    }

    pub fn is_expression(&self) -> bool {
        matches!(
            self,
            NodeKind::BinaryOp
                | NodeKind::UnaryOp
                | NodeKind::FunctionCall
                | NodeKind::MemberAccess
                | NodeKind::ArrayAccess
                | NodeKind::ArrayLiteral
                | NodeKind::Literal
                | NodeKind::Identifier
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A syntax tree node. Children are owned exclusively.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub value: String,
    pub line: u32,
    pub children: Vec<Node>,
    pub attributes: BTreeMap<String, String>,
}

impl Node {
    pub fn new(kind: NodeKind, value: impl Into<String>, line: u32) -> Self {
        Self {
            kind,
            value: value.into(),
            line,
            children: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_attribute(key, value);
        self
    }

    pub fn add_child(&mut self, child: Node) {
        self.children.push(child);
    }

    pub fn set_attribute(&mut self, key: &str, value: impl Into<String>) {
        self.attributes.insert(key.to_string(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// The `index`th child, if populated
    pub fn child(&self, index: usize) -> Option<&Node> {
        self.children.get(index)
    }

    pub fn is(&self, kind: NodeKind) -> bool {
        self.kind == kind
    }

    /// Entry-point functions are tagged with the type `Main`
    pub fn is_entry_point(&self) -> bool {
        self.kind == NodeKind::FunctionDecl && self.attribute("type") == Some("Main")
    }

    fn write_tree(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}{}", "", self.kind, indent = depth * 2)?;
        if !self.value.is_empty() {
            write!(f, ": {}", self.value.escape_debug())?;
        }
        if !self.attributes.is_empty() {
            let attrs: Vec<String> = self
                .attributes
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, " [{}]", attrs.join(", "))?;
        }
        writeln!(f)?;
        for child in &self.children {
            child.write_tree(f, depth + 1)?;
        }
        Ok(())
    }
}

/// Indented tree dump, one node per line
impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_tree(f, 0)
    }
}

/// Summary counts over a parsed tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseStatistics {
    pub total_nodes: usize,
    pub functions: usize,
    pub classes: usize,
    pub statements: usize,
    pub expressions: usize,
    pub imports: usize,
    pub exec_directives: usize,
    pub max_depth: usize,
}

impl ParseStatistics {
    pub fn collect(root: &Node) -> Self {
        let mut stats = Self::default();
        stats.visit(root, 1);
        stats
    }

    fn visit(&mut self, node: &Node, depth: usize) {
        self.total_nodes += 1;
        self.max_depth = self.max_depth.max(depth);
        match node.kind {
            NodeKind::FunctionDecl => self.functions += 1,
            NodeKind::ClassDecl => self.classes += 1,
            NodeKind::Import => self.imports += 1,
            NodeKind::Exec => self.exec_directives += 1,
            kind if kind.is_statement() => self.statements += 1,
            kind if kind.is_expression() => self.expressions += 1,
            _ => {}
        }
        for child in &node.children {
            self.visit(child, depth + 1);
        }
    }
}

impl fmt::Display for ParseStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total nodes:     {}", self.total_nodes)?;
        writeln!(f, "Functions:       {}", self.functions)?;
        writeln!(f, "Classes:         {}", self.classes)?;
        writeln!(f, "Statements:      {}", self.statements)?;
        writeln!(f, "Expressions:     {}", self.expressions)?;
        writeln!(f, "Imports:         {}", self.imports)?;
        writeln!(f, "Exec directives: {}", self.exec_directives)?;
        write!(f, "Max depth:       {}", self.max_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Node {
        let assign = Node::new(NodeKind::Assignment, "x", 2)
            .with_child(Node::new(NodeKind::Literal, "1", 2));
        let body = Node::new(NodeKind::Block, "", 1).with_child(assign);
        let main = Node::new(NodeKind::FunctionDecl, "Main", 1)
            .with_attribute("type", "Main")
            .with_child(body);
        Node::new(NodeKind::Program, "", 1)
            .with_child(Node::new(NodeKind::Import, "math", 1))
            .with_child(main)
    }

    #[test]
    fn test_attributes() {
        let mut node = Node::new(NodeKind::VectorDecl, "v", 3);
        assert_eq!(node.attribute("elementType"), None);
        node.set_attribute("elementType", "Int");
        assert_eq!(node.attribute("elementType"), Some("Int"));
        assert!(node.has_attribute("elementType"));
    }

    #[test]
    fn test_entry_point_tag() {
        let program = sample();
        assert!(program.children[1].is_entry_point());
        assert!(!program.children[0].is_entry_point());
        let helper = Node::new(NodeKind::FunctionDecl, "helper", 1).with_attribute("type", "Void");
        assert!(!helper.is_entry_point());
    }

    #[test]
    fn test_child_out_of_range() {
        let node = Node::new(NodeKind::If, "", 1);
        assert!(node.child(0).is_none());
    }

    #[test]
    fn test_tree_printer() {
        let text = sample().to_string();
        let expected = "\
Program
  Import: math
  FunctionDecl: Main [type=Main]
    Block
      Assignment: x
        Literal: 1
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_statistics() {
        let stats = ParseStatistics::collect(&sample());
        assert_eq!(stats.total_nodes, 6);
        assert_eq!(stats.functions, 1);
        assert_eq!(stats.imports, 1);
        assert_eq!(stats.statements, 1);
        assert_eq!(stats.expressions, 1);
        assert_eq!(stats.classes, 0);
        assert_eq!(stats.max_depth, 5);
    }
}
