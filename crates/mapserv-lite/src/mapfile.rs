//! Mapfile subset: lexer, parser and writer
//!
//! ```text
//! MAP
//!   NAME "world"
//!   SIZE 400 300
//!   EXTENT -180 -90 180 90
//!   WEB
//!     VALIDATION "q" "^[0-9]+$" END
//!     METADATA "title" "World" END
//!   END
//!   LAYER
//!     NAME "roads"
//!     TYPE LINE
//!     STATUS ON
//!     DATA "roads_%q%"
//!   END
//! END
//! ```
//!
//! Keywords are case-insensitive. `#` starts a comment that runs to the end
//! of the line.

use std::fmt;
use thiserror::Error;

/// Errors produced while reading a mapfile
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A token that is not valid at its position
    #[error("Parsing error near ({token}):(line {line})")]
    Unexpected {
        /// Token text
        token: String,
        /// 1-based line number
        line: usize,
    },

    /// Input ended inside a block
    #[error("Premature End-of-File.")]
    Eof,
}

/// Layer display status
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LayerStatus {
    /// Drawn when requested
    On,
    /// Not drawn unless requested
    Off,
    /// Always drawn
    Default,
}

impl LayerStatus {
    /// Parse a STATUS value
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "ON" => Some(LayerStatus::On),
            "OFF" => Some(LayerStatus::Off),
            "DEFAULT" => Some(LayerStatus::Default),
            _ => None,
        }
    }

    /// Keyword form
    pub fn as_str(self) -> &'static str {
        match self {
            LayerStatus::On => "ON",
            LayerStatus::Off => "OFF",
            LayerStatus::Default => "DEFAULT",
        }
    }
}

/// Ordered key/value table, matching keys case-insensitively
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    entries: Vec<(String, String)>,
}

impl Table {
    /// Look up a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Insert or replace a value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&key)) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// All entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Check if the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The WEB block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Web {
    /// Parameter validation patterns
    pub validation: Table,
    /// Free-form metadata
    pub metadata: Table,
}

/// A LAYER block
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// Layer name
    pub name: String,
    /// Geometry type keyword
    pub kind: String,
    /// Display status
    pub status: LayerStatus,
    /// Data source
    pub data: String,
    /// Class group selected for drawing
    pub class_group: Option<String>,
    /// Parameter validation patterns
    pub validation: Table,
}

impl Default for Layer {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: "POLYGON".to_string(),
            status: LayerStatus::Off,
            data: String::new(),
            class_group: None,
            validation: Table::default(),
        }
    }
}

/// A parsed map definition
#[derive(Debug, Clone, PartialEq)]
pub struct MapDef {
    /// Map name
    pub name: String,
    /// Output size in pixels
    pub size: (u32, u32),
    /// Spatial extent (minx, miny, maxx, maxy)
    pub extent: Option<[f64; 4]>,
    /// WEB block
    pub web: Web,
    /// Layers in drawing order
    pub layers: Vec<Layer>,
}

impl Default for MapDef {
    fn default() -> Self {
        Self {
            name: String::new(),
            size: (400, 300),
            extent: None,
            web: Web::default(),
            layers: Vec::new(),
        }
    }
}

impl MapDef {
    /// Parse mapfile text
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let tokens = tokenize(source)?;
        Parser { tokens, pos: 0 }.parse_map()
    }

    /// Find a layer by name
    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name.eq_ignore_ascii_case(name))
    }

    /// Find a layer by name for editing
    pub fn layer_mut(&mut self, name: &str) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    text: String,
    quoted: bool,
    line: usize,
}

impl Token {
    fn is_keyword(&self, keyword: &str) -> bool {
        !self.quoted && self.text.eq_ignore_ascii_case(keyword)
    }

    fn unexpected(&self) -> ParseError {
        ParseError::Unexpected {
            token: self.text.clone(),
            line: self.line,
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1;

    while let Some(&c) = chars.peek() {
        match c {
            '\n' => {
                line += 1;
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '"' | '\'' => {
                let quote = c;
                let start_line = line;
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('\\') if chars.peek() == Some(&quote) => {
                            chars.next();
                            text.push(quote);
                        }
                        Some(c) if c == quote => break,
                        Some(c) => {
                            if c == '\n' {
                                line += 1;
                            }
                            text.push(c);
                        }
                        None => {
                            return Err(ParseError::Unexpected {
                                token: format!("{}{}", quote, text),
                                line: start_line,
                            })
                        }
                    }
                }
                tokens.push(Token {
                    text,
                    quoted: true,
                    line: start_line,
                });
            }
            _ => {
                let mut text = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '#' || c == '"' || c == '\'' {
                        break;
                    }
                    text.push(c);
                    chars.next();
                }
                tokens.push(Token {
                    text,
                    quoted: false,
                    line,
                });
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn next(&mut self) -> Result<Token, ParseError> {
        let token = self.tokens.get(self.pos).cloned().ok_or(ParseError::Eof)?;
        self.pos += 1;
        Ok(token)
    }

    fn string(&mut self) -> Result<String, ParseError> {
        Ok(self.next()?.text)
    }

    fn number<T: std::str::FromStr>(&mut self) -> Result<T, ParseError> {
        let token = self.next()?;
        token.text.parse().map_err(|_| token.unexpected())
    }

    fn parse_map(mut self) -> Result<MapDef, ParseError> {
        let first = self.next()?;
        if !first.is_keyword("MAP") {
            return Err(first.unexpected());
        }

        let mut map = MapDef::default();
        loop {
            let token = self.next()?;
            if token.quoted {
                return Err(token.unexpected());
            }
            match token.text.to_ascii_uppercase().as_str() {
                "NAME" => map.name = self.string()?,
                "SIZE" => map.size = (self.number()?, self.number()?),
                "EXTENT" => {
                    map.extent = Some([self.number()?, self.number()?, self.number()?, self.number()?]);
                }
                "WEB" => map.web = self.parse_web()?,
                "LAYER" => {
                    let layer = self.parse_layer()?;
                    map.layers.push(layer);
                }
                "END" => break,
                _ => return Err(token.unexpected()),
            }
        }

        if let Some(trailing) = self.tokens.get(self.pos) {
            return Err(trailing.unexpected());
        }
        Ok(map)
    }

    fn parse_web(&mut self) -> Result<Web, ParseError> {
        let mut web = Web::default();
        loop {
            let token = self.next()?;
            if token.quoted {
                return Err(token.unexpected());
            }
            match token.text.to_ascii_uppercase().as_str() {
                "VALIDATION" => self.parse_table(&mut web.validation)?,
                "METADATA" => self.parse_table(&mut web.metadata)?,
                "END" => return Ok(web),
                _ => return Err(token.unexpected()),
            }
        }
    }

    fn parse_layer(&mut self) -> Result<Layer, ParseError> {
        let mut layer = Layer::default();
        loop {
            let token = self.next()?;
            if token.quoted {
                return Err(token.unexpected());
            }
            match token.text.to_ascii_uppercase().as_str() {
                "NAME" => layer.name = self.string()?,
                "TYPE" => layer.kind = self.string()?.to_ascii_uppercase(),
                "STATUS" => {
                    let value = self.next()?;
                    layer.status = LayerStatus::parse(&value.text).ok_or_else(|| value.unexpected())?;
                }
                "DATA" => layer.data = self.string()?,
                "CLASSGROUP" => layer.class_group = Some(self.string()?),
                "VALIDATION" => self.parse_table(&mut layer.validation)?,
                "END" => return Ok(layer),
                _ => return Err(token.unexpected()),
            }
        }
    }

    fn parse_table(&mut self, table: &mut Table) -> Result<(), ParseError> {
        loop {
            let key = self.next()?;
            if key.is_keyword("END") {
                return Ok(());
            }
            let value = self.string()?;
            table.insert(key.text, value);
        }
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\\\""))
}

fn write_table(f: &mut fmt::Formatter<'_>, indent: &str, keyword: &str, table: &Table) -> fmt::Result {
    if table.is_empty() {
        return Ok(());
    }
    writeln!(f, "{}{}", indent, keyword)?;
    for (key, value) in table.iter() {
        writeln!(f, "{}  {} {}", indent, quote(key), quote(value))?;
    }
    writeln!(f, "{}END", indent)
}

impl fmt::Display for MapDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MAP")?;
        writeln!(f, "  NAME {}", quote(&self.name))?;
        writeln!(f, "  SIZE {} {}", self.size.0, self.size.1)?;
        if let Some([minx, miny, maxx, maxy]) = self.extent {
            writeln!(f, "  EXTENT {} {} {} {}", minx, miny, maxx, maxy)?;
        }
        if !self.web.validation.is_empty() || !self.web.metadata.is_empty() {
            writeln!(f, "  WEB")?;
            write_table(f, "    ", "VALIDATION", &self.web.validation)?;
            write_table(f, "    ", "METADATA", &self.web.metadata)?;
            writeln!(f, "  END")?;
        }
        for layer in &self.layers {
            writeln!(f, "  LAYER")?;
            writeln!(f, "    NAME {}", quote(&layer.name))?;
            writeln!(f, "    TYPE {}", layer.kind)?;
            writeln!(f, "    STATUS {}", layer.status.as_str())?;
            writeln!(f, "    DATA {}", quote(&layer.data))?;
            if let Some(group) = &layer.class_group {
                writeln!(f, "    CLASSGROUP {}", quote(group))?;
            }
            write_table(f, "    ", "VALIDATION", &layer.validation)?;
            writeln!(f, "  END")?;
        }
        writeln!(f, "END")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORLD: &str = r#"
# A small map
MAP
  NAME "world"
  SIZE 200 100
  EXTENT -180 -90 180 90
  WEB
    VALIDATION
      "q" "^[0-9]+$"
    END
    METADATA
      'title' 'The "World"'
    END
  END
  LAYER
    NAME roads
    TYPE line
    STATUS on
    DATA "roads_%q%"  # substituted per request
  END
  layer
    name "rivers"
    status DEFAULT
    data "rivers"
    validation "default_q" "0" end
  end
END
"#;

    #[test]
    fn test_parse_map() {
        let map = MapDef::parse(WORLD).unwrap();
        assert_eq!(map.name, "world");
        assert_eq!(map.size, (200, 100));
        assert_eq!(map.extent, Some([-180.0, -90.0, 180.0, 90.0]));
        assert_eq!(map.web.validation.get("Q"), Some("^[0-9]+$"));
        assert_eq!(map.web.metadata.get("title"), Some("The \"World\""));
        assert_eq!(map.layers.len(), 2);

        let roads = map.layer("ROADS").unwrap();
        assert_eq!(roads.kind, "LINE");
        assert_eq!(roads.status, LayerStatus::On);
        assert_eq!(roads.data, "roads_%q%");

        let rivers = map.layer("rivers").unwrap();
        assert_eq!(rivers.status, LayerStatus::Default);
        assert_eq!(rivers.validation.get("default_q"), Some("0"));
    }

    #[test]
    fn test_written_map_parses_back() {
        let map = MapDef::parse(WORLD).unwrap();
        let text = map.to_string();
        assert_eq!(MapDef::parse(&text).unwrap(), map);
    }

    #[test]
    fn test_error_reports_token_and_line() {
        let source = "MAP\n  NAME \"x\"\n  LAYER\n    NAME a\n  LAYER\n  END\nEND\n";
        let err = MapDef::parse(source).unwrap_err();
        assert_eq!(err.to_string(), "Parsing error near (LAYER):(line 5)");
    }

    #[test]
    fn test_premature_eof() {
        let err = MapDef::parse("MAP NAME \"x\" LAYER NAME a").unwrap_err();
        assert_eq!(err, ParseError::Eof);
        assert_eq!(err.to_string(), "Premature End-of-File.");
    }

    #[test]
    fn test_bad_values() {
        let err = MapDef::parse("MAP SIZE wide 10 END").unwrap_err();
        assert_eq!(err.to_string(), "Parsing error near (wide):(line 1)");

        let err = MapDef::parse("MAP LAYER STATUS maybe END END").unwrap_err();
        assert_eq!(err.to_string(), "Parsing error near (maybe):(line 1)");

        let err = MapDef::parse("MAP END extra").unwrap_err();
        assert_eq!(err.to_string(), "Parsing error near (extra):(line 1)");

        let err = MapDef::parse("NAME \"x\"").unwrap_err();
        assert_eq!(err.to_string(), "Parsing error near (NAME):(line 1)");
    }

    #[test]
    fn test_unterminated_string() {
        let err = MapDef::parse("MAP\nNAME \"open\nEND").unwrap_err();
        assert_eq!(err.to_string(), "Parsing error near (\"open\nEND):(line 2)");
    }
}
