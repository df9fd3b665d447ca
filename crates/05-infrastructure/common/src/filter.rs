//! 服务属性过滤器
//!
//! 支持 LDAP 风格的过滤表达式，例如 `(&(region=eu-*)(!(deprecated=true))(weight>=10))`。
//! 值中的 `*` 为通配符，`\` 转义下一个字符。

use crate::errors::ValidationError;
use crate::metadata::ServiceProperties;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// 属性过滤器
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// 全部子条件匹配
    And(Vec<Filter>),
    /// 任一子条件匹配
    Or(Vec<Filter>),
    /// 取反
    Not(Box<Filter>),
    /// 属性存在
    Present(String),
    /// 相等（可含通配符）
    Equal(String, ValuePattern),
    /// 大于等于
    GreaterOrEqual(String, String),
    /// 小于等于
    LessOrEqual(String, String),
}

/// 等值比较的模式，按未转义的 `*` 切分
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuePattern {
    parts: Vec<String>,
}

impl ValuePattern {
    /// 精确匹配模式
    pub fn exact(value: impl Into<String>) -> Self {
        Self {
            parts: vec![value.into()],
        }
    }

    fn has_wildcard(&self) -> bool {
        self.parts.len() > 1
    }

    fn matches(&self, candidate: &str) -> bool {
        if !self.has_wildcard() {
            return self.parts[0] == candidate;
        }
        let last = self.parts.len() - 1;
        let mut rest = candidate;
        for (index, part) in self.parts.iter().enumerate() {
            if index == 0 {
                match rest.strip_prefix(part.as_str()) {
                    Some(stripped) => rest = stripped,
                    None => return false,
                }
            } else if index == last {
                return rest.ends_with(part.as_str());
            } else if !part.is_empty() {
                match rest.find(part.as_str()) {
                    Some(position) => rest = &rest[position + part.len()..],
                    None => return false,
                }
            }
        }
        true
    }
}

impl fmt::Display for ValuePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, part) in self.parts.iter().enumerate() {
            if index > 0 {
                f.write_str("*")?;
            }
            write_escaped(f, part)?;
        }
        Ok(())
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    for ch in value.chars() {
        if matches!(ch, '(' | ')' | '*' | '\\') {
            f.write_str("\\")?;
        }
        write!(f, "{ch}")?;
    }
    Ok(())
}

impl Filter {
    /// 解析过滤表达式；不带括号的单个条件（如 `name=foo`）也被接受
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::invalid_filter(input, "表达式为空"));
        }
        let wrapped;
        let source = if trimmed.starts_with('(') {
            trimmed
        } else {
            wrapped = format!("({trimmed})");
            wrapped.as_str()
        };

        let mut parser = Parser::new(source);
        let filter = parser
            .parse_filter()
            .map_err(|reason| ValidationError::invalid_filter(input, reason))?;
        parser.skip_whitespace();
        if !parser.is_done() {
            return Err(ValidationError::invalid_filter(
                input,
                format!("位置 {} 处存在多余内容", parser.pos),
            ));
        }
        Ok(filter)
    }

    /// 判断属性集合是否满足过滤器
    pub fn matches(&self, properties: &ServiceProperties) -> bool {
        match self {
            Self::And(filters) => filters.iter().all(|f| f.matches(properties)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(properties)),
            Self::Not(filter) => !filter.matches(properties),
            Self::Present(key) => properties.contains_key(key),
            Self::Equal(key, pattern) => properties
                .get(key)
                .is_some_and(|value| equal_matches(value, pattern)),
            Self::GreaterOrEqual(key, bound) => properties.get(key).is_some_and(|value| {
                compare_matches(value, bound, |ordering| ordering != Ordering::Less)
            }),
            Self::LessOrEqual(key, bound) => properties.get(key).is_some_and(|value| {
                compare_matches(value, bound, |ordering| ordering != Ordering::Greater)
            }),
        }
    }
}

fn equal_matches(value: &Value, pattern: &ValuePattern) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|item| equal_matches(item, pattern)),
        Value::String(text) => pattern.matches(text),
        Value::Number(number) => {
            if pattern.has_wildcard() {
                return pattern.matches(&number.to_string());
            }
            match (number.as_f64(), pattern.parts[0].trim().parse::<f64>()) {
                (Some(actual), Ok(expected)) => (actual - expected).abs() < f64::EPSILON,
                _ => false,
            }
        }
        Value::Bool(flag) => pattern.parts[0].eq_ignore_ascii_case(if *flag { "true" } else { "false" }),
        Value::Null | Value::Object(_) => false,
    }
}

fn compare_matches(value: &Value, bound: &str, accept: impl Fn(Ordering) -> bool + Copy) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|item| compare_matches(item, bound, accept)),
        Value::Number(number) => match (number.as_f64(), bound.trim().parse::<f64>()) {
            (Some(actual), Ok(expected)) => actual.partial_cmp(&expected).is_some_and(accept),
            _ => false,
        },
        Value::String(text) => match (text.trim().parse::<f64>(), bound.trim().parse::<f64>()) {
            (Ok(actual), Ok(expected)) => actual.partial_cmp(&expected).is_some_and(accept),
            _ => accept(text.as_str().cmp(bound)),
        },
        _ => false,
    }
}

impl FromStr for Filter {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And(filters) => {
                f.write_str("(&")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Self::Or(filters) => {
                f.write_str("(|")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Self::Not(filter) => write!(f, "(!{filter})"),
            Self::Present(key) => write!(f, "({key}=*)"),
            Self::Equal(key, pattern) => write!(f, "({key}={pattern})"),
            Self::GreaterOrEqual(key, bound) => {
                write!(f, "({key}>=")?;
                write_escaped(f, bound)?;
                f.write_str(")")
            }
            Self::LessOrEqual(key, bound) => {
                write!(f, "({key}<=")?;
                write_escaped(f, bound)?;
                f.write_str(")")
            }
        }
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), String> {
        match self.bump() {
            Some(ch) if ch == expected => Ok(()),
            Some(ch) => Err(format!("位置 {} 处期望 '{expected}'，实际为 '{ch}'", self.pos - ch.len_utf8())),
            None => Err(format!("期望 '{expected}'，但表达式已结束")),
        }
    }

    fn parse_filter(&mut self) -> Result<Filter, String> {
        self.skip_whitespace();
        self.expect('(')?;
        self.skip_whitespace();
        let filter = match self.peek() {
            Some('&') => {
                self.bump();
                Filter::And(self.parse_list()?)
            }
            Some('|') => {
                self.bump();
                Filter::Or(self.parse_list()?)
            }
            Some('!') => {
                self.bump();
                Filter::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_item()?,
            None => return Err("表达式意外结束".to_string()),
        };
        self.skip_whitespace();
        self.expect(')')?;
        Ok(filter)
    }

    fn parse_list(&mut self) -> Result<Vec<Filter>, String> {
        let mut filters = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() != Some('(') {
                break;
            }
            filters.push(self.parse_filter()?);
        }
        if filters.is_empty() {
            return Err(format!("位置 {} 处的组合条件没有子条件", self.pos));
        }
        Ok(filters)
    }

    fn parse_item(&mut self) -> Result<Filter, String> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if matches!(ch, '=' | '<' | '>' | '(' | ')') {
                break;
            }
            self.bump();
        }
        let key = self.input[start..self.pos].trim().to_string();
        if key.is_empty() {
            return Err(format!("位置 {start} 处缺少属性名"));
        }

        let operator = match self.bump() {
            Some('=') => '=',
            Some(op @ ('<' | '>')) => {
                self.expect('=')?;
                op
            }
            _ => return Err(format!("属性 {key} 缺少比较运算符")),
        };

        let (parts, raw) = self.parse_value()?;
        match operator {
            '=' if raw == "*" => Ok(Filter::Present(key)),
            '=' => Ok(Filter::Equal(key, ValuePattern { parts })),
            '>' => Ok(Filter::GreaterOrEqual(key, parts.concat())),
            _ => Ok(Filter::LessOrEqual(key, parts.concat())),
        }
    }

    /// 读取值直到右括号，返回按通配符切分的片段和原始文本
    fn parse_value(&mut self) -> Result<(Vec<String>, String), String> {
        let start = self.pos;
        let mut parts = vec![String::new()];
        loop {
            match self.peek() {
                Some(')') | None => break,
                Some('(') => return Err(format!("位置 {} 处的值包含未转义的 '('", self.pos)),
                Some('\\') => {
                    self.bump();
                    let escaped = self
                        .bump()
                        .ok_or_else(|| "转义符后缺少字符".to_string())?;
                    if let Some(current) = parts.last_mut() {
                        current.push(escaped);
                    }
                }
                Some('*') => {
                    self.bump();
                    parts.push(String::new());
                }
                Some(ch) => {
                    self.bump();
                    if let Some(current) = parts.last_mut() {
                        current.push(ch);
                    }
                }
            }
        }
        Ok((parts, self.input[start..self.pos].to_string()))
    }
}
