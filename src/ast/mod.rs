/// AST node types consumed by the backend.
///
/// The front end (lexer, parser, semantic analysis) produces this tree and
/// hands it over read-only. A node carries a tag, up to four scalar payload
/// slots, and an ordered list of children. Built-in operations arrive as
/// `Call` nodes whose name is canonicalized by the compile layer.

/// Discriminant for every node the backend understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeTag {
    Program,
    Function,
    Subroutine,
    Pool,
    PoolField,
    Block,
    Assignment,
    If,
    While,
    ForEvery,
    Branch,
    BranchCase,
    Return,
    Break,
    Continue,
    Call,
    Identifier,
    Number,
    StringLit,
}

/// Declared type of a binding, parameter, or return value.
///
/// The backend records these but does not act on them; every value is a
/// 64-bit machine word. Type checking happens in the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeTag {
    #[default]
    Integer,
    Text,
    Address,
    Void,
}

impl TypeTag {
    pub fn code(self) -> i64 {
        match self {
            TypeTag::Integer => 0,
            TypeTag::Text => 1,
            TypeTag::Address => 2,
            TypeTag::Void => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<TypeTag> {
        match code {
            0 => Some(TypeTag::Integer),
            1 => Some(TypeTag::Text),
            2 => Some(TypeTag::Address),
            3 => Some(TypeTag::Void),
            _ => None,
        }
    }
}

/// Scalar payload slot: a name, a literal value, or nothing.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Data {
    #[default]
    None,
    Int(i64),
    Name(String),
}

impl Data {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Data::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&str> {
        match self {
            Data::Name(s) => Some(s),
            _ => None,
        }
    }
}

/// One node of the input tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    tag: NodeTag,
    data1: Data,
    data2: Data,
    data3: Data,
    data4: Data,
    children: Vec<Node>,
}

impl Node {
    pub fn new(tag: NodeTag) -> Node {
        Node {
            tag,
            data1: Data::None,
            data2: Data::None,
            data3: Data::None,
            data4: Data::None,
            children: Vec::new(),
        }
    }

    pub fn tag(&self) -> NodeTag {
        self.tag
    }

    pub fn data1(&self) -> &Data {
        &self.data1
    }

    pub fn data2(&self) -> &Data {
        &self.data2
    }

    pub fn data3(&self) -> &Data {
        &self.data3
    }

    pub fn data4(&self) -> &Data {
        &self.data4
    }

    pub fn child(&self, index: usize) -> Option<&Node> {
        self.children.get(index)
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    // Construction helpers used by the front end and by tests.

    pub fn program(children: Vec<Node>) -> Node {
        Node {
            children,
            ..Node::new(NodeTag::Program)
        }
    }

    pub fn number(value: i64) -> Node {
        Node {
            data1: Data::Int(value),
            ..Node::new(NodeTag::Number)
        }
    }

    pub fn string(value: &str) -> Node {
        Node {
            data1: Data::Name(value.to_string()),
            ..Node::new(NodeTag::StringLit)
        }
    }

    pub fn identifier(name: &str) -> Node {
        Node {
            data1: Data::Name(name.to_string()),
            ..Node::new(NodeTag::Identifier)
        }
    }

    pub fn call(name: &str, args: Vec<Node>) -> Node {
        Node {
            data1: Data::Name(name.to_string()),
            children: args,
            ..Node::new(NodeTag::Call)
        }
    }

    pub fn assignment(target: &str, value: Node) -> Node {
        Node {
            data1: Data::Name(target.to_string()),
            children: vec![value],
            ..Node::new(NodeTag::Assignment)
        }
    }

    pub fn block(statements: Vec<Node>) -> Node {
        Node {
            children: statements,
            ..Node::new(NodeTag::Block)
        }
    }

    pub fn if_stmt(condition: Node, then_body: Vec<Node>, else_body: Option<Vec<Node>>) -> Node {
        let mut children = vec![condition, Node::block(then_body)];
        if let Some(else_body) = else_body {
            children.push(Node::block(else_body));
        }
        Node {
            children,
            ..Node::new(NodeTag::If)
        }
    }

    pub fn while_loop(condition: Node, body: Vec<Node>) -> Node {
        Node {
            children: vec![condition, Node::block(body)],
            ..Node::new(NodeTag::While)
        }
    }

    pub fn for_every(variable: &str, collection: Node, body: Vec<Node>) -> Node {
        Node {
            data1: Data::Name(variable.to_string()),
            children: vec![collection, Node::block(body)],
            ..Node::new(NodeTag::ForEvery)
        }
    }

    /// Multi-way dispatch on an integer selector: the selector expression,
    /// one `BranchCase` child per case (value + block), and optionally a
    /// trailing default `Block`.
    pub fn branch(selector: Node, cases: Vec<(i64, Vec<Node>)>, default: Option<Vec<Node>>) -> Node {
        let mut children = vec![selector];
        children.extend(cases.into_iter().map(|(value, body)| Node {
            data1: Data::Int(value),
            children: vec![Node::block(body)],
            ..Node::new(NodeTag::BranchCase)
        }));
        if let Some(default) = default {
            children.push(Node::block(default));
        }
        Node {
            children,
            ..Node::new(NodeTag::Branch)
        }
    }

    pub fn ret(value: Option<Node>) -> Node {
        Node {
            children: value.into_iter().collect(),
            ..Node::new(NodeTag::Return)
        }
    }

    pub fn brk() -> Node {
        Node::new(NodeTag::Break)
    }

    pub fn cont() -> Node {
        Node::new(NodeTag::Continue)
    }

    pub fn function(name: &str, params: &[(&str, TypeTag)], return_type: TypeTag, body: Vec<Node>) -> Node {
        let mut children: Vec<Node> = params
            .iter()
            .map(|(param, ty)| Node {
                data1: Data::Name(param.to_string()),
                data2: Data::Int(ty.code()),
                ..Node::new(NodeTag::Identifier)
            })
            .collect();
        children.push(Node::block(body));
        Node {
            data1: Data::Name(name.to_string()),
            data2: Data::Int(return_type.code()),
            children,
            ..Node::new(NodeTag::Function)
        }
    }

    pub fn subroutine(name: &str, body: Vec<Node>) -> Node {
        Node {
            data1: Data::Name(name.to_string()),
            children: vec![Node::block(body)],
            ..Node::new(NodeTag::Subroutine)
        }
    }

    pub fn pool(name: &str, fields: &[(&str, i64)]) -> Node {
        let children = fields
            .iter()
            .map(|(field, initial)| Node {
                data1: Data::Name(field.to_string()),
                data2: Data::Int(*initial),
                data3: Data::Int(1),
                ..Node::new(NodeTag::PoolField)
            })
            .collect();
        Node {
            data1: Data::Name(name.to_string()),
            children,
            ..Node::new(NodeTag::Pool)
        }
    }
}
