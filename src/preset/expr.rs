//! Preset equation language.
//!
//! Statements are `name = expression;`. Expressions support the usual
//! arithmetic operators, parentheses and a fixed library of functions.
//! Parsing produces an AST with nom; [`compile`] resolves names to slots of a
//! [`SymbolTable`] so evaluation is a walk over plain indices.

use nom::{
    branch::alt,
    bytes::complete::take_while,
    character::complete::{char, digit0, digit1, multispace0, one_of, satisfy},
    combinator::{all_consuming, map, map_res, opt, recognize},
    error::ErrorKind,
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use super::vars::SymbolTable;

/// Binary operators, by precedence group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinOp {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            BinOp::Rem => a % b,
        }
    }
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Var(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

/// `target = value`
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub target: String,
    pub value: Expr,
    /// Byte offset of the statement in the program source.
    pub offset: usize,
}

/// Syntax error with the byte offset where parsing stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub offset: usize,
    pub message: String,
}

/// Name-resolution error raised by [`compile`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    /// Offset of the offending statement.
    pub offset: usize,
    pub message: String,
}

fn parse_number(input: &str) -> IResult<&str, f64> {
    map_res(
        recognize(tuple((
            alt((
                recognize(pair(digit1, opt(pair(char('.'), digit0)))),
                recognize(pair(char('.'), digit1)),
            )),
            opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
        ))),
        |s: &str| s.parse::<f64>(),
    )(input)
}

fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

/// Parenthesis, call and unary-sign nesting accepted by the parser.
pub const MAX_NESTING: usize = 64;
/// Depth of the expression tree after operator chains are folded.
pub const MAX_TREE_DEPTH: usize = 256;

fn too_deep(input: &str) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Failure(nom::error::Error::new(input, ErrorKind::TooLarge))
}

/// Depth of `expr`, walked with an explicit stack.
fn tree_depth(expr: &Expr) -> usize {
    let mut deepest = 0;
    let mut stack: Vec<(&Expr, usize)> = vec![(expr, 1)];
    while let Some((node, depth)) = stack.pop() {
        deepest = deepest.max(depth);
        match node {
            Expr::Number(_) | Expr::Var(_) => {}
            Expr::Neg(inner) => stack.push((inner.as_ref(), depth + 1)),
            Expr::Binary(_, lhs, rhs) => {
                stack.push((lhs.as_ref(), depth + 1));
                stack.push((rhs.as_ref(), depth + 1));
            }
            Expr::Call(_, args) => stack.extend(args.iter().map(|a| (a, depth + 1))),
        }
    }
    deepest
}

/// Identifier, or a function call when followed by an argument list.
fn parse_call_or_var(input: &str, nesting: usize) -> IResult<&str, Expr> {
    let (input, name) = parse_identifier(input)?;
    let (input, args) = opt(preceded(
        multispace0,
        delimited(
            char('('),
            separated_list0(char(','), |i| parse_nested(i, nesting + 1)),
            preceded(multispace0, char(')')),
        ),
    ))(input)?;

    let expr = match args {
        Some(args) => Expr::Call(name.to_string(), args),
        None => Expr::Var(name.to_string()),
    };
    Ok((input, expr))
}

fn parse_primary(input: &str, nesting: usize) -> IResult<&str, Expr> {
    delimited(
        multispace0,
        alt((
            map(parse_number, Expr::Number),
            |i| parse_call_or_var(i, nesting),
            delimited(
                char('('),
                |i| parse_nested(i, nesting + 1),
                preceded(multispace0, char(')')),
            ),
        )),
        multispace0,
    )(input)
}

fn parse_unary(input: &str, nesting: usize) -> IResult<&str, Expr> {
    if nesting > MAX_NESTING {
        return Err(too_deep(input));
    }
    preceded(
        multispace0,
        alt((
            map(preceded(char('-'), |i| parse_unary(i, nesting + 1)), |e| {
                Expr::Neg(Box::new(e))
            }),
            preceded(char('+'), |i| parse_unary(i, nesting + 1)),
            |i| parse_primary(i, nesting),
        )),
    )(input)
}

/// Left-fold an operator chain, refusing chains that would nest too deeply.
fn fold_chain<'a>(
    rest: &'a str,
    first: Expr,
    operations: Vec<(BinOp, Expr)>,
) -> IResult<&'a str, Expr> {
    if operations.len() > MAX_TREE_DEPTH {
        return Err(too_deep(rest));
    }
    let expr = operations
        .into_iter()
        .fold(first, |acc, (op, rhs)| Expr::Binary(op, Box::new(acc), Box::new(rhs)));
    if tree_depth(&expr) > MAX_TREE_DEPTH {
        return Err(too_deep(rest));
    }
    Ok((rest, expr))
}

/// Multiplication, division and remainder (higher precedence)
fn parse_mul_div(input: &str, nesting: usize) -> IResult<&str, Expr> {
    let (input, first) = parse_unary(input, nesting)?;

    let (input, operations) = many0(tuple((
        map(delimited(multispace0, one_of("*/%"), multispace0), |op| match op {
            '*' => BinOp::Mul,
            '/' => BinOp::Div,
            _ => BinOp::Rem,
        }),
        |i| parse_unary(i, nesting),
    )))(input)?;

    fold_chain(input, first, operations)
}

/// Addition and subtraction (lower precedence)
fn parse_add_sub(input: &str, nesting: usize) -> IResult<&str, Expr> {
    let (input, first) = parse_mul_div(input, nesting)?;

    let (input, operations) = many0(tuple((
        map(delimited(multispace0, one_of("+-"), multispace0), |op| {
            if op == '+' {
                BinOp::Add
            } else {
                BinOp::Sub
            }
        }),
        |i| parse_mul_div(i, nesting),
    )))(input)?;

    fold_chain(input, first, operations)
}

fn parse_nested(input: &str, nesting: usize) -> IResult<&str, Expr> {
    parse_add_sub(input, nesting)
}

/// Parse one expression, consuming surrounding whitespace.
///
/// Nesting beyond [`MAX_NESTING`] or trees deeper than [`MAX_TREE_DEPTH`]
/// fail with [`ErrorKind::TooLarge`].
pub fn parse_expr(input: &str) -> IResult<&str, Expr> {
    parse_nested(input, 0)
}

fn parse_statement(input: &str) -> IResult<&str, Statement> {
    map(
        tuple((
            multispace0,
            parse_identifier,
            multispace0,
            char('='),
            parse_expr,
        )),
        |(_, target, _, _, value)| Statement {
            target: target.to_string(),
            value,
            offset: 0,
        },
    )(input)
}

/// Parse `;`-separated statements. Empty statements are skipped.
pub fn parse_program(source: &str) -> Result<Vec<Statement>, SyntaxError> {
    let mut statements = Vec::new();
    let mut start = 0;

    for segment in source.split(';') {
        let segment_start = start;
        start += segment.len() + 1;

        if segment.trim().is_empty() {
            continue;
        }

        match all_consuming(parse_statement)(segment) {
            Ok((_, mut statement)) => {
                let leading = segment.len() - segment.trim_start().len();
                statement.offset = segment_start + leading;
                statements.push(statement);
            }
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                let rest = e.input.trim_start();
                let offset = segment_start + (segment.len() - rest.len());
                let message = if e.code == ErrorKind::TooLarge {
                    "expression nested too deeply".to_string()
                } else if rest.is_empty() {
                    format!("incomplete statement `{}`", segment.trim())
                } else {
                    let snippet: String = rest.chars().take(16).collect();
                    format!("unexpected `{}` in `{}`", snippet, segment.trim())
                };
                return Err(SyntaxError { offset, message });
            }
            Err(nom::Err::Incomplete(_)) => {
                return Err(SyntaxError {
                    offset: segment_start,
                    message: format!("incomplete statement `{}`", segment.trim()),
                });
            }
        }
    }

    Ok(statements)
}

/// Built-in function library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Sqrt,
    Abs,
    Pow,
    Exp,
    Log,
    Log10,
    Min,
    Max,
    Sign,
    Int,
    Sqr,
    Sigmoid,
    Above,
    Below,
    Equal,
    If,
    Band,
    Bor,
    Bnot,
}

impl Func {
    pub fn lookup(name: &str) -> Option<Func> {
        let func = match name {
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "asin" => Func::Asin,
            "acos" => Func::Acos,
            "atan" => Func::Atan,
            "atan2" => Func::Atan2,
            "sqrt" => Func::Sqrt,
            "abs" => Func::Abs,
            "pow" => Func::Pow,
            "exp" => Func::Exp,
            "log" => Func::Log,
            "log10" => Func::Log10,
            "min" => Func::Min,
            "max" => Func::Max,
            "sign" => Func::Sign,
            "int" => Func::Int,
            "sqr" => Func::Sqr,
            "sigmoid" => Func::Sigmoid,
            "above" => Func::Above,
            "below" => Func::Below,
            "equal" => Func::Equal,
            "if" => Func::If,
            "band" => Func::Band,
            "bor" => Func::Bor,
            "bnot" => Func::Bnot,
            _ => return None,
        };
        Some(func)
    }

    pub fn arity(self) -> usize {
        match self {
            Func::Atan2
            | Func::Pow
            | Func::Min
            | Func::Max
            | Func::Sigmoid
            | Func::Above
            | Func::Below
            | Func::Equal
            | Func::Band
            | Func::Bor => 2,
            Func::If => 3,
            _ => 1,
        }
    }

    fn apply(self, a: &[f64]) -> f64 {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        match self {
            Func::Sin => a[0].sin(),
            Func::Cos => a[0].cos(),
            Func::Tan => a[0].tan(),
            Func::Asin => a[0].asin(),
            Func::Acos => a[0].acos(),
            Func::Atan => a[0].atan(),
            Func::Atan2 => a[0].atan2(a[1]),
            Func::Sqrt => a[0].sqrt(),
            Func::Abs => a[0].abs(),
            Func::Pow => a[0].powf(a[1]),
            Func::Exp => a[0].exp(),
            Func::Log => a[0].ln(),
            Func::Log10 => a[0].log10(),
            Func::Min => a[0].min(a[1]),
            Func::Max => a[0].max(a[1]),
            Func::Sign => {
                if a[0] > 0.0 {
                    1.0
                } else if a[0] < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            Func::Int => a[0].trunc(),
            Func::Sqr => a[0] * a[0],
            Func::Sigmoid => 1.0 / (1.0 + (-a[0] * a[1]).exp()),
            Func::Above => flag(a[0] > a[1]),
            Func::Below => flag(a[0] < a[1]),
            Func::Equal => flag(a[0] == a[1]),
            Func::If => {
                if a[0] != 0.0 {
                    a[1]
                } else {
                    a[2]
                }
            }
            Func::Band => flag(a[0] != 0.0 && a[1] != 0.0),
            Func::Bor => flag(a[0] != 0.0 || a[1] != 0.0),
            Func::Bnot => flag(a[0] == 0.0),
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Const(f64),
    Load(usize),
    Neg(Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
    Call(Func, Box<[Node]>),
}

impl Node {
    fn eval(&self, vars: &[f64]) -> f64 {
        match self {
            Node::Const(v) => *v,
            Node::Load(slot) => vars[*slot],
            Node::Neg(inner) => -inner.eval(vars),
            Node::Binary(op, a, b) => op.apply(a.eval(vars), b.eval(vars)),
            Node::Call(func, args) => {
                let mut values = [0.0f64; 3];
                for (value, arg) in values.iter_mut().zip(args.iter()) {
                    *value = arg.eval(vars);
                }
                func.apply(&values[..args.len()])
            }
        }
    }
}

/// Compiled statement list, ready to run against a slot vector.
#[derive(Debug, Clone, Default)]
pub struct Program {
    statements: Vec<(usize, Node)>,
}

impl Program {
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Slots this program assigns, in statement order.
    pub fn targets(&self) -> impl Iterator<Item = usize> + '_ {
        self.statements.iter().map(|(slot, _)| *slot)
    }

    /// Execute every statement in order. `vars` must be at least as long as
    /// the symbol table the program was compiled against.
    pub fn run(&self, vars: &mut [f64]) {
        for (slot, node) in &self.statements {
            let value = node.eval(vars);
            vars[*slot] = value;
        }
    }
}

fn lower(expr: &Expr, symbols: &mut SymbolTable) -> Result<Node, String> {
    let node = match expr {
        Expr::Number(v) => Node::Const(*v),
        // Unassigned names read as 0, like any fresh user variable.
        Expr::Var(name) => Node::Load(symbols.intern(name)),
        Expr::Neg(inner) => match lower(inner, symbols)? {
            Node::Const(v) => Node::Const(-v),
            other => Node::Neg(Box::new(other)),
        },
        Expr::Binary(op, a, b) => match (lower(a, symbols)?, lower(b, symbols)?) {
            (Node::Const(a), Node::Const(b)) => Node::Const(op.apply(a, b)),
            (a, b) => Node::Binary(*op, Box::new(a), Box::new(b)),
        },
        Expr::Call(name, args) => {
            let func =
                Func::lookup(name).ok_or_else(|| format!("unknown function `{}`", name))?;
            if args.len() != func.arity() {
                return Err(format!(
                    "`{}` takes {} argument(s), got {}",
                    name,
                    func.arity(),
                    args.len()
                ));
            }
            let args = args
                .iter()
                .map(|arg| lower(arg, symbols))
                .collect::<Result<Vec<_>, _>>()?;
            Node::Call(func, args.into_boxed_slice())
        }
    };
    Ok(node)
}

/// Resolve names and check assignments against read-only inputs.
pub fn compile(statements: &[Statement], symbols: &mut SymbolTable) -> Result<Program, CompileError> {
    let mut compiled = Vec::with_capacity(statements.len());
    for statement in statements {
        if let Some(slot) = symbols.slot(&statement.target) {
            if SymbolTable::is_read_only(slot) {
                return Err(CompileError {
                    offset: statement.offset,
                    message: format!("cannot assign to read-only input `{}`", statement.target),
                });
            }
        }
        let node = lower(&statement.value, symbols).map_err(|message| CompileError {
            offset: statement.offset,
            message,
        })?;
        let slot = symbols.intern(&statement.target);
        compiled.push((slot, node));
    }
    Ok(Program {
        statements: compiled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::vars::{BASS, BUILTIN_COUNT, ZOOM};

    fn eval(source: &str) -> f64 {
        let (rest, expr) = parse_expr(source).unwrap();
        assert!(rest.is_empty(), "unparsed: {:?}", rest);
        let mut symbols = SymbolTable::with_builtins();
        let program = compile(
            &[Statement {
                target: "out".into(),
                value: expr,
                offset: 0,
            }],
            &mut symbols,
        )
        .unwrap();
        let mut vars = symbols.default_values();
        program.run(&mut vars);
        vars[symbols.slot("out").unwrap()]
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("1 + 2 * 3"), 7.0);
        assert_eq!(eval("(1 + 2) * 3"), 9.0);
        assert_eq!(eval("10 - 4 - 3"), 3.0);
        assert_eq!(eval("-2 * -3"), 6.0);
        assert_eq!(eval("7 % 4"), 3.0);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(eval(".5"), 0.5);
        assert_eq!(eval("2."), 2.0);
        assert_eq!(eval("1e2"), 100.0);
        assert_eq!(eval("2.5E-1"), 0.25);
    }

    #[test]
    fn test_functions() {
        assert_eq!(eval("max(1, 3)"), 3.0);
        assert_eq!(eval("if(above(2, 1), 10, 20)"), 10.0);
        assert_eq!(eval("sqr(3)"), 9.0);
        assert_eq!(eval("int(-2.7)"), -2.0);
        assert_eq!(eval("bnot(0) + band(1, 0) + bor(0, 2)"), 2.0);
        assert!((eval("sin(0.5)") - 0.5f64.sin()).abs() < 1e-12);
    }

    #[test]
    fn test_division_by_zero_is_not_finite() {
        assert!(!eval("1 / 0").is_finite());
    }

    #[test]
    fn test_program_with_variables() {
        let statements =
            parse_program("zoom = 1 + 0.1 * bass; phase = phase + 1;\n phase = phase * 2;").unwrap();
        assert_eq!(statements.len(), 3);

        let mut symbols = SymbolTable::with_builtins();
        let program = compile(&statements, &mut symbols).unwrap();
        let phase = symbols.slot("phase").unwrap();
        assert_eq!(phase, BUILTIN_COUNT);

        let mut vars = symbols.default_values();
        vars[BASS] = 2.0;
        program.run(&mut vars);
        assert!((vars[ZOOM] - 1.2).abs() < 1e-12);
        assert_eq!(vars[phase], 2.0);

        program.run(&mut vars);
        assert_eq!(vars[phase], 6.0);
    }

    #[test]
    fn test_syntax_errors_report_offset() {
        let err = parse_program("zoom = 1;\nrot = 2 +* 3;").unwrap_err();
        assert!(err.offset >= 10, "offset {}", err.offset);
        assert!(err.message.contains("rot"));

        assert!(parse_program("zoom 1").is_err());
        assert!(parse_program("zoom = (1 + 2").is_err());
        assert!(parse_program("zoom = ").is_err());
    }

    #[test]
    fn test_compile_rejects_read_only_and_unknown() {
        let mut symbols = SymbolTable::with_builtins();
        let err = compile(&parse_program("bass = 1").unwrap(), &mut symbols).unwrap_err();
        assert!(err.message.contains("read-only"));

        let err = compile(&parse_program("zoom = frobnicate(1)").unwrap(), &mut symbols).unwrap_err();
        assert!(err.message.contains("unknown function"));

        let err = compile(&parse_program("zoom = pow(2)").unwrap(), &mut symbols).unwrap_err();
        assert!(err.message.contains("takes 2"));
    }

    #[test]
    fn test_deep_nesting_is_a_syntax_error() {
        for depth in [MAX_NESTING + 1, 5_000, 200_000] {
            let parens = format!("zoom = {}1{}", "(".repeat(depth), ")".repeat(depth));
            let err = parse_program(&parens).unwrap_err();
            assert!(err.message.contains("nested too deeply"), "{}", err.message);

            let signs = format!("zoom = {}1", "-".repeat(depth));
            let err = parse_program(&signs).unwrap_err();
            assert!(err.message.contains("nested too deeply"), "{}", err.message);

            let calls = format!("zoom = {}1{}", "sin(".repeat(depth), ")".repeat(depth));
            assert!(parse_program(&calls).is_err());
        }
    }

    #[test]
    fn test_nesting_within_limits_still_parses() {
        let depth = MAX_NESTING / 2;
        let source = format!("{}2{}", "(".repeat(depth), ")".repeat(depth));
        assert_eq!(eval(&source), 2.0);
        assert_eq!(eval("- - -1"), -1.0);
        assert_eq!(eval("+-+-3"), 3.0);
    }

    #[test]
    fn test_long_operator_chain_is_bounded() {
        let ok = vec!["1"; MAX_TREE_DEPTH / 2].join(" + ");
        assert_eq!(eval(&ok), (MAX_TREE_DEPTH / 2) as f64);

        let long = vec!["1"; 100_000].join(" + ");
        let err = parse_program(&format!("zoom = {}", long)).unwrap_err();
        assert!(err.message.contains("nested too deeply"));
    }

    #[test]
    fn test_empty_statements_are_skipped() {
        assert!(parse_program(" ; ;\n").unwrap().is_empty());
    }
}
