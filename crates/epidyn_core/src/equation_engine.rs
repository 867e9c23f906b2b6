use crate::error::{NumericError, ParseError};
use crate::functions::{checked_div, FunctionRegistry};
use crate::model::RateFunction;
use std::cell::RefCell;
use std::collections::HashMap;

/// OpCodes for the Stack-based Virtual Machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant `f64` value onto the stack.
    LoadConst(f64),
    /// Pushes the value of a state variable (by index) onto the stack.
    /// Indices correspond to the order variables were declared.
    LoadVar(usize),
    /// Pushes the value of a model constant (by index) onto the stack.
    LoadParam(usize),
    /// Pushes the current time.
    LoadTime,
    /// Pops top two values (b, a), pushes (a + b).
    Add,
    /// Pops top two values (b, a), pushes (a - b).
    Sub,
    /// Pops top two values (b, a), pushes (a * b).
    Mul,
    /// Pops top two values (b, a), pushes (a / b). Fails on b == 0.
    Div,
    /// Pops top two values (b, a), pushes (a ^ b).
    Pow,
    /// Pops top value (a), pushes -a.
    Neg,
    /// Pops `argc` arguments and pushes the registry function's result.
    Call { func: usize, argc: usize },
}

/// Represents a compiled sequence of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

/// Stack-based Virtual Machine for evaluating rate expressions.
///
/// The VM is stateless; `execute` takes all necessary context and returns the
/// value left on the stack.
pub struct VM;

impl VM {
    pub fn execute(
        bytecode: &Bytecode,
        t: f64,
        vars: &[f64],
        params: &[f64],
        functions: &FunctionRegistry,
        stack: &mut Vec<f64>,
    ) -> Result<f64, NumericError> {
        stack.clear();

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(val),
                OpCode::LoadVar(idx) => stack.push(vars[idx]),
                OpCode::LoadParam(idx) => stack.push(params[idx]),
                OpCode::LoadTime => stack.push(t),
                OpCode::Add => {
                    let (a, b) = pop2(stack);
                    stack.push(a + b);
                }
                OpCode::Sub => {
                    let (a, b) = pop2(stack);
                    stack.push(a - b);
                }
                OpCode::Mul => {
                    let (a, b) = pop2(stack);
                    stack.push(a * b);
                }
                OpCode::Div => {
                    let (a, b) = pop2(stack);
                    stack.push(checked_div(a, b, "expression")?);
                }
                OpCode::Pow => {
                    let (a, b) = pop2(stack);
                    stack.push(a.powf(b));
                }
                OpCode::Neg => {
                    let a = pop(stack);
                    stack.push(-a);
                }
                OpCode::Call { func, argc } => {
                    let start = stack.len().saturating_sub(argc);
                    let f = functions
                        .get(func)
                        .ok_or(NumericError::UnknownFunction { index: func })?;
                    let value = (f.eval)(&stack[start..])?;
                    stack.truncate(start);
                    stack.push(value);
                }
            }
        }

        // Compiled code always leaves exactly one value; NaN is caught by the
        // caller's finiteness check otherwise.
        Ok(pop(stack))
    }
}

fn pop(stack: &mut Vec<f64>) -> f64 {
    stack.pop().unwrap_or(f64::NAN)
}

fn pop2(stack: &mut Vec<f64>) -> (f64, f64) {
    let b = pop(stack);
    let a = pop(stack);
    (a, b)
}

// --- AST & Parser ---

/// Abstract Syntax Tree nodes for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>), // char is operator +, -, *, /, ^
    Unary(char, Box<Expr>),             // -
    Call(String, Vec<Expr>),
}

/// Compiles an AST (`Expr`) into `Bytecode`.
/// Resolves variable, constant and function names to indices.
pub struct Compiler<'a> {
    pub var_map: HashMap<String, usize>,
    pub param_map: HashMap<String, usize>,
    functions: &'a FunctionRegistry,
}

impl<'a> Compiler<'a> {
    pub fn new(var_names: &[&str], param_names: &[&str], functions: &'a FunctionRegistry) -> Self {
        let var_map = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();
        let param_map = param_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_string(), i))
            .collect();

        Self {
            var_map,
            param_map,
            functions,
        }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode, ParseError> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<(), ParseError> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                if let Some(&idx) = self.var_map.get(name) {
                    ops.push(OpCode::LoadVar(idx));
                } else if let Some(&idx) = self.param_map.get(name) {
                    ops.push(OpCode::LoadParam(idx));
                } else if name == "t" {
                    ops.push(OpCode::LoadTime);
                } else {
                    return Err(ParseError::UnknownSymbol(name.clone()));
                }
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                ops.push(match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    _ => OpCode::Pow,
                });
            }
            Expr::Unary(_, operand) => {
                self.compile_recursive(operand, ops)?;
                ops.push(OpCode::Neg);
            }
            Expr::Call(name, args) => {
                let (func, def) = self
                    .functions
                    .lookup(name)
                    .ok_or_else(|| ParseError::UnknownFunction(name.clone()))?;
                if def.arity != args.len() {
                    return Err(ParseError::Arity {
                        name: name.clone(),
                        expected: def.arity,
                        actual: args.len(),
                    });
                }
                for arg in args {
                    self.compile_recursive(arg, ops)?;
                }
                ops.push(OpCode::Call {
                    func,
                    argc: args.len(),
                });
            }
        }
        Ok(())
    }
}

// --- Simple Parser ---

/// Parses a string expression into an AST.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    if parser.pos != parser.tokens.len() {
        return Err(ParseError::TrailingInput);
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num_str = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num_str.push(d);
                    chars.next();
                } else if (d == 'e' || d == 'E') && !num_str.contains(['e', 'E']) {
                    num_str.push(d);
                    chars.next();
                    if let Some(&sign) = chars.peek() {
                        if sign == '+' || sign == '-' {
                            num_str.push(sign);
                            chars.next();
                        }
                    }
                } else {
                    break;
                }
            }
            let value = num_str
                .parse()
                .map_err(|_| ParseError::InvalidNumber(num_str.clone()))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            tokens.push(match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                ',' => Token::Comma,
                other => return Err(ParseError::UnexpectedChar(other)),
            });
            chars.next();
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, token: Token, label: &'static str) -> Result<(), ParseError> {
        match self.consume() {
            Some(t) if t == token => Ok(()),
            _ => Err(ParseError::Expected(label)),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_factor()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => '+',
                Token::Minus => '-',
                _ => break,
            };
            self.consume();
            let right = self.parse_factor()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Star => '*',
                Token::Slash => '/',
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    // Unary minus binds looser than `^`, so `-x^2` is `-(x^2)`.
    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            let expr = self.parse_unary()?;
            return Ok(Expr::Unary('-', Box::new(expr)));
        }
        self.parse_power()
    }

    // Right-associative: `a^b^c` is `a^(b^c)`.
    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume(); // eat '('
                    let mut args = Vec::new();
                    if let Some(Token::RParen) = self.peek() {
                        self.consume();
                        return Ok(Expr::Call(name, args));
                    }
                    loop {
                        args.push(self.parse_expression()?);
                        match self.consume() {
                            Some(Token::Comma) => continue,
                            Some(Token::RParen) => break,
                            _ => return Err(ParseError::Expected(")")),
                        }
                    }
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect(Token::RParen, ")")?;
                Ok(expr)
            }
            _ => Err(ParseError::UnexpectedToken),
        }
    }
}

/// Parses and compiles a single expression.
pub fn compile_source(compiler: &Compiler, source: &str) -> Result<Bytecode, ParseError> {
    compiler.compile(&parse(source)?)
}

// --- CompiledRates ---

/// A [`RateFunction`] backed by one compiled expression per state variable.
pub struct CompiledRates {
    pub equations: Vec<Bytecode>,
    functions: FunctionRegistry,
    // Interior mutability for VM stack to avoid allocation per evaluation.
    stack: RefCell<Vec<f64>>,
}

impl CompiledRates {
    /// Parses and compiles one rate expression per variable, in order.
    pub fn compile(
        expressions: &[&str],
        var_names: &[&str],
        param_names: &[&str],
        functions: FunctionRegistry,
    ) -> Result<Self, ParseError> {
        let compiler = Compiler::new(var_names, param_names, &functions);
        let equations = expressions
            .iter()
            .map(|source| compile_source(&compiler, source))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_equations(equations, functions))
    }

    /// Wraps bytecode already compiled against `functions`.
    pub fn from_equations(equations: Vec<Bytecode>, functions: FunctionRegistry) -> Self {
        Self {
            equations,
            functions,
            stack: RefCell::new(Vec::with_capacity(64)),
        }
    }
}

impl RateFunction for CompiledRates {
    fn evaluate(
        &self,
        t: f64,
        state: &[f64],
        constants: &[f64],
        out: &mut [f64],
    ) -> Result<(), NumericError> {
        let mut stack = self.stack.borrow_mut();
        for (i, eq) in self.equations.iter().enumerate() {
            out[i] = VM::execute(eq, t, state, constants, &self.functions, &mut stack)?;
        }
        Ok(())
    }
}
