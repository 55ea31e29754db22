//! A small CMISQL subset: enough to exercise the client's query path.
//!
//! Supported: `SELECT * | col [AS alias], SCORE() [AS alias], ...`
//! `FROM cmis:document | cmis:folder`, an optional `WHERE` of `AND`-joined
//! `col = 'v'`, `col LIKE 'p%'`, `CONTAINS('text')`, `IN_FOLDER('id')`,
//! `IN_TREE('id')`, and an optional `ORDER BY col [ASC|DESC]`.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::{Kind, Object, Property, Repository};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Str(String),
    Sym(char),
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, ':' | '_' | '.')
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '\'' {
            chars.next();
            let mut literal = String::new();
            loop {
                match chars.next() {
                    Some('\'') if chars.peek() == Some(&'\'') => {
                        chars.next();
                        literal.push('\'');
                    }
                    Some('\'') => break,
                    Some(other) => literal.push(other),
                    None => return Err("unterminated string literal".to_string()),
                }
            }
            tokens.push(Token::Str(literal));
        } else if matches!(c, ',' | '(' | ')' | '=' | '*') {
            chars.next();
            tokens.push(Token::Sym(c));
        } else if is_word_char(c) {
            let mut word = String::new();
            while let Some(&next) = chars.peek() {
                if !is_word_char(next) {
                    break;
                }
                word.push(next);
                chars.next();
            }
            tokens.push(Token::Word(word));
        } else {
            return Err(format!("unexpected character {c:?}"));
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    All,
    Property { id: String, alias: Option<String> },
    Score { alias: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Equals { column: String, value: String },
    Like { column: String, pattern: String },
    Contains(String),
    InFolder(String),
    InTree(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub columns: Vec<Column>,
    pub from: Kind,
    pub predicates: Vec<Predicate>,
    pub order_by: Option<(String, bool)>,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn keyword(&mut self, keyword: &str) -> bool {
        let found = self.at_keyword(keyword);
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), String> {
        if self.keyword(keyword) {
            return Ok(());
        }
        Err(format!("expected {keyword}, found {}", self.describe()))
    }

    fn symbol(&mut self, symbol: char) -> bool {
        let found = self.peek() == Some(&Token::Sym(symbol));
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect_symbol(&mut self, symbol: char) -> Result<(), String> {
        if self.symbol(symbol) {
            return Ok(());
        }
        Err(format!("expected '{symbol}', found {}", self.describe()))
    }

    fn word(&mut self, what: &str) -> Result<String, String> {
        match self.bump() {
            Some(Token::Word(word)) => Ok(word),
            _ => {
                self.pos -= 1;
                Err(format!("expected {what}, found {}", self.describe()))
            }
        }
    }

    fn literal(&mut self) -> Result<String, String> {
        match self.bump() {
            Some(Token::Str(value)) => Ok(value),
            _ => {
                self.pos -= 1;
                Err(format!("expected string literal, found {}", self.describe()))
            }
        }
    }

    fn describe(&self) -> String {
        match self.peek() {
            Some(Token::Word(w)) => w.clone(),
            Some(Token::Str(s)) => format!("'{s}'"),
            Some(Token::Sym(c)) => c.to_string(),
            None => "end of statement".to_string(),
        }
    }

    fn alias(&mut self) -> Result<Option<String>, String> {
        if self.keyword("AS") {
            return self.word("alias").map(Some);
        }
        Ok(None)
    }

    fn columns(&mut self) -> Result<Vec<Column>, String> {
        if self.symbol('*') {
            return Ok(vec![Column::All]);
        }
        let mut columns = Vec::new();
        loop {
            let name = self.word("column")?;
            let column = if name.eq_ignore_ascii_case("SCORE") && self.symbol('(') {
                self.expect_symbol(')')?;
                Column::Score {
                    alias: self.alias()?,
                }
            } else {
                Column::Property {
                    id: name,
                    alias: self.alias()?,
                }
            };
            columns.push(column);
            if !self.symbol(',') {
                return Ok(columns);
            }
        }
    }

    fn function_argument(&mut self) -> Result<String, String> {
        self.expect_symbol('(')?;
        let value = self.literal()?;
        self.expect_symbol(')')?;
        Ok(value)
    }

    fn predicate(&mut self) -> Result<Predicate, String> {
        let name = self.word("predicate")?;
        if name.eq_ignore_ascii_case("CONTAINS") {
            return Ok(Predicate::Contains(self.function_argument()?));
        }
        if name.eq_ignore_ascii_case("IN_FOLDER") {
            return Ok(Predicate::InFolder(self.function_argument()?));
        }
        if name.eq_ignore_ascii_case("IN_TREE") {
            return Ok(Predicate::InTree(self.function_argument()?));
        }
        if self.symbol('=') {
            return Ok(Predicate::Equals {
                column: name,
                value: self.literal()?,
            });
        }
        if self.keyword("LIKE") {
            return Ok(Predicate::Like {
                column: name,
                pattern: self.literal()?,
            });
        }
        Err(format!("expected = or LIKE after {name}, found {}", self.describe()))
    }
}

pub fn parse(statement: &str) -> Result<Statement, String> {
    let mut parser = Parser {
        tokens: tokenize(statement)?,
        pos: 0,
    };
    parser.expect_keyword("SELECT")?;
    let columns = parser.columns()?;
    parser.expect_keyword("FROM")?;
    let type_id = parser.word("type")?;
    let from = Kind::from_type_id(&type_id).ok_or_else(|| format!("unknown type {type_id}"))?;

    let mut predicates = Vec::new();
    if parser.keyword("WHERE") {
        predicates.push(parser.predicate()?);
        while parser.keyword("AND") {
            predicates.push(parser.predicate()?);
        }
    }

    let mut order_by = None;
    if parser.keyword("ORDER") {
        parser.expect_keyword("BY")?;
        let column = parser.word("order column")?;
        let descending = if parser.keyword("DESC") {
            true
        } else {
            parser.keyword("ASC");
            false
        };
        order_by = Some((column, descending));
    }

    if parser.peek().is_some() {
        return Err(format!("unexpected {} after statement", parser.describe()));
    }
    Ok(Statement {
        columns,
        from,
        predicates,
        order_by,
    })
}

fn like(pattern: &[char], text: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('%', rest)) => (0..=text.len()).any(|i| like(rest, &text[i..])),
        Some(('_', rest)) => !text.is_empty() && like(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && like(rest, &text[1..]),
    }
}

fn first_value(repo: &Repository, object: &Object, column: &str) -> Option<String> {
    repo.properties_of(object)
        .into_iter()
        .find(|p| p.id == column)
        .and_then(|p| p.values.into_iter().next())
}

fn matches(repo: &Repository, object: &Object, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Equals { column, value } => {
            first_value(repo, object, column).as_deref() == Some(value.as_str())
        }
        Predicate::Like { column, pattern } => first_value(repo, object, column).is_some_and(|v| {
            let pattern: Vec<char> = pattern.chars().collect();
            let text: Vec<char> = v.chars().collect();
            like(&pattern, &text)
        }),
        Predicate::Contains(needle) => object.content.as_ref().is_some_and(|content| {
            String::from_utf8_lossy(&content.bytes)
                .to_lowercase()
                .contains(&needle.to_lowercase())
        }),
        Predicate::InFolder(folder) => object.parent.as_deref() == Some(folder.as_str()),
        Predicate::InTree(folder) => repo.is_descendant(&object.id, folder),
    }
}

/// Runs a parsed statement and projects each matching object to a row.
pub fn evaluate(repo: &Repository, statement: &Statement) -> Vec<Vec<Property>> {
    let mut hits: Vec<&Object> = repo
        .objects()
        .filter(|o| o.kind == statement.from)
        .filter(|o| statement.predicates.iter().all(|p| matches(repo, o, p)))
        .collect();
    hits.sort_by_key(|o| o.seq);
    if let Some((column, descending)) = &statement.order_by {
        hits.sort_by_key(|o| first_value(repo, o, column));
        if *descending {
            hits.reverse();
        }
    }

    hits.into_iter()
        .map(|object| {
            let properties = repo.properties_of(object);
            let mut row = Vec::new();
            for column in &statement.columns {
                match column {
                    Column::All => row.extend(properties.iter().cloned()),
                    Column::Property { id, alias } => {
                        if let Some(property) = properties.iter().find(|p| &p.id == id) {
                            row.push(Property {
                                id: alias.clone().unwrap_or_else(|| id.clone()),
                                ..property.clone()
                            });
                        }
                    }
                    Column::Score { alias } => row.push(Property {
                        id: alias.clone().unwrap_or_else(|| "SEARCH_SCORE".to_string()),
                        element: "propertyDecimal".to_string(),
                        values: vec!["1.0".to_string()],
                    }),
                }
            }
            row
        })
        .collect()
}

/// The fields of a posted `cmis:query` document.
#[derive(Debug, Default, PartialEq)]
pub struct QueryRequest {
    pub statement: String,
    pub max_items: Option<usize>,
    pub skip_count: usize,
}

pub fn parse_request(body: &[u8]) -> Result<QueryRequest, String> {
    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text(true);
    let mut request = QueryRequest::default();
    let mut current = String::new();
    let mut saw_statement = false;

    loop {
        match reader
            .read_event()
            .map_err(|e| format!("malformed query document: {e}"))?
        {
            Event::Start(start) => {
                current = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| format!("bad text: {e}"))?
                    .into_owned();
                let number = || {
                    text.trim()
                        .parse::<usize>()
                        .map_err(|e| format!("invalid {current} {text:?}: {e}"))
                };
                match current.as_str() {
                    "statement" => {
                        request.statement.push_str(&text);
                        saw_statement = true;
                    }
                    "maxItems" => request.max_items = Some(number()?),
                    "skipCount" => request.skip_count = number()?,
                    _ => {}
                }
            }
            Event::CData(data) => {
                if current == "statement" {
                    request
                        .statement
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                    saw_statement = true;
                }
            }
            Event::End(_) => current.clear(),
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_statement {
        return Err("query document has no statement".to_string());
    }
    Ok(request)
}
