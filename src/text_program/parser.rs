//! Parser for the textual program format.

use super::TextProgram;
use crate::core::{CompileError, CompileResult, Place};
use crate::kernel::KernelDesc;
use crate::program::{Attribute, OpDesc, VarDesc};

pub fn parse_program(text: &str) -> CompileResult<TextProgram> {
    Parser::new(text).parse()
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
    out: TextProgram,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            line: 1,
            out: TextProgram::default(),
        }
    }

    fn parse(mut self) -> CompileResult<TextProgram> {
        self.skip_whitespace(true);
        while !self.is_eof() {
            self.parse_statement()?;
            self.end_of_statement()?;
            self.skip_whitespace(true);
        }
        Ok(self.out)
    }

    fn error(&self, reason: impl Into<String>) -> CompileError {
        CompileError::Parse {
            line: self.line,
            reason: reason.into(),
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn current_char(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            if ch == '\n' {
                self.line += 1;
            }
            self.pos += ch.len_utf8();
        }
    }

    fn skip_whitespace(&mut self, skip_newlines: bool) {
        while let Some(ch) = self.current_char() {
            if ch == ';' {
                while let Some(ch) = self.current_char() {
                    if ch == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else if ch.is_whitespace() {
                if ch == '\n' && !skip_newlines {
                    break;
                }
                self.advance();
            } else {
                break;
            }
        }
    }

    fn at_line_end(&mut self) -> bool {
        self.skip_whitespace(false);
        matches!(self.current_char(), None | Some('\n'))
    }

    fn end_of_statement(&mut self) -> CompileResult<()> {
        if self.at_line_end() {
            return Ok(());
        }
        Err(self.error(format!("unexpected {:?} after statement", self.current_char().unwrap_or(' '))))
    }

    fn try_read(&mut self, ch: char) -> bool {
        self.skip_whitespace(false);
        if self.current_char() == Some(ch) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> CompileResult<()> {
        if self.try_read(ch) {
            return Ok(());
        }
        Err(self.error(format!("expected '{}' but found {:?}", ch, self.current_char())))
    }

    /// Names may contain `/`, `.`, `@` and `-` besides identifier characters.
    fn read_name(&mut self) -> CompileResult<&'a str> {
        self.skip_whitespace(false);
        let start = self.pos;
        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || matches!(ch, '_' | '/' | '.' | '@' | '-') {
                self.advance();
            } else {
                break;
            }
        }
        if start == self.pos {
            return Err(self.error(format!("expected a name but found {:?}", self.current_char())));
        }
        Ok(&self.text[start..self.pos])
    }

    fn read_place(&mut self) -> CompileResult<Place> {
        let text = self.read_name()?;
        text.parse().map_err(|err: CompileError| self.error(err.to_string()))
    }

    fn parse_statement(&mut self) -> CompileResult<()> {
        match self.read_name()? {
            "places" => {
                while !self.at_line_end() {
                    let place = self.read_place()?;
                    self.out.valid_places.push(place);
                }
            }
            keyword @ ("var" | "weight") => {
                let persistable = keyword == "weight";
                while !self.at_line_end() {
                    let name = self.read_name()?.to_string();
                    self.out.program.add_var(VarDesc { name, persistable });
                }
            }
            "op" => {
                let op = self.parse_op()?;
                self.out.program.add_op(op);
            }
            "kernel" => {
                let kernel = self.parse_kernel()?;
                self.out.kernels.register(kernel);
            }
            other => return Err(self.error(format!("unknown statement `{}`", other))),
        }
        Ok(())
    }

    fn parse_op(&mut self) -> CompileResult<OpDesc> {
        let mut op = OpDesc::new(self.read_name()?);
        for (slot, args) in self.parse_slots()? {
            op.set_input(slot, args);
        }
        self.expect('-')?;
        self.expect('>')?;
        for (slot, args) in self.parse_slots()? {
            op.set_output(slot, args);
        }
        if self.try_read('{') {
            while !self.try_read('}') {
                let name = self.read_name()?;
                self.expect('=')?;
                let value = self.parse_attribute()?;
                op.set_attr(name, value);
                if !self.try_read(',') && self.current_char() != Some('}') {
                    return Err(self.error("expected ',' or '}' in attribute list"));
                }
            }
        }
        Ok(op)
    }

    fn parse_slots(&mut self) -> CompileResult<Vec<(&'a str, Vec<String>)>> {
        let mut slots = Vec::new();
        self.expect('(')?;
        while !self.try_read(')') {
            let slot = self.read_name()?;
            self.expect('=')?;
            let mut args = vec![self.read_name()?.to_string()];
            while self.try_read('|') {
                args.push(self.read_name()?.to_string());
            }
            slots.push((slot, args));
            if !self.try_read(',') && self.current_char() != Some(')') {
                return Err(self.error("expected ',' or ')' in slot list"));
            }
        }
        Ok(slots)
    }

    fn parse_attribute(&mut self) -> CompileResult<Attribute> {
        self.skip_whitespace(false);
        match self.current_char() {
            Some('"') => {
                self.advance();
                let start = self.pos;
                while let Some(ch) = self.current_char() {
                    if ch == '"' || ch == '\n' {
                        break;
                    }
                    self.advance();
                }
                let value = self.text[start..self.pos].to_string();
                self.expect('"')?;
                Ok(Attribute::Str(value))
            }
            Some('[') => {
                self.advance();
                let mut items = Vec::new();
                while !self.try_read(']') {
                    items.push(self.read_number()?);
                    if !self.try_read(',') && self.current_char() != Some(']') {
                        return Err(self.error("expected ',' or ']' in list"));
                    }
                }
                if items.iter().all(|n| matches!(n, Attribute::Int(_))) {
                    Ok(Attribute::Ints(items.iter().filter_map(Attribute::as_int).collect()))
                } else {
                    Ok(Attribute::Floats(items.iter().filter_map(Attribute::as_float).collect()))
                }
            }
            Some(ch) if ch.is_alphabetic() => match self.read_name()? {
                "true" => Ok(Attribute::Bool(true)),
                "false" => Ok(Attribute::Bool(false)),
                other => Err(self.error(format!("invalid attribute value `{}`", other))),
            },
            _ => self.read_number(),
        }
    }

    fn read_number(&mut self) -> CompileResult<Attribute> {
        self.skip_whitespace(false);
        let start = self.pos;
        while let Some(ch) = self.current_char() {
            if ch.is_ascii_digit() || matches!(ch, '-' | '+' | '.' | 'e' | 'E') {
                self.advance();
            } else {
                break;
            }
        }
        let text = &self.text[start..self.pos];
        if let Ok(v) = text.parse::<i64>() {
            return Ok(Attribute::Int(v));
        }
        text.parse::<f64>()
            .map(Attribute::Float)
            .map_err(|_| self.error(format!("invalid number `{}`", text)))
    }

    fn parse_kernel(&mut self) -> CompileResult<KernelDesc> {
        let op_type = self.read_name()?;
        let place = self.read_place()?;
        let mut alias = "def";
        let mut input = None;
        let mut output = None;
        while !self.at_line_end() {
            let key = self.read_name()?;
            self.expect('=')?;
            match key {
                "alias" => alias = self.read_name()?,
                "in" => input = Some(self.read_place()?),
                "out" => output = Some(self.read_place()?),
                other => return Err(self.error(format!("unknown kernel field `{}`", other))),
            }
        }

        let kernel = KernelDesc::new(op_type, place, alias);
        match (input, output) {
            (None, None) => Ok(kernel),
            (input, output) => Ok(kernel.with_io(input.unwrap_or(place), output.unwrap_or(place))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TargetType;

    #[test]
    fn test_parse_program() {
        let text = r#"
            ; two operators
            places cuda/float/NCHW host/float/NCHW
            var x y z
            weight w
            op conv2d(Input=x, Filter=w) -> (Output=y) {strides=[1, 1], act="relu", alpha=0.5, fuse=true}
            op concat(X=y|x) -> (Out=z) {axis=-1}
            kernel conv2d cuda/float/NCHW
            kernel io_copy cuda/any/any alias=host_to_device in=host/any/any out=cuda/any/any
        "#;
        let parsed = parse_program(text).unwrap();

        assert_eq!(parsed.valid_places.len(), 2);
        assert_eq!(parsed.program.vars.len(), 4);
        assert!(parsed.program.var("w").unwrap().persistable);
        assert!(!parsed.program.var("x").unwrap().persistable);

        let conv = &parsed.program.ops[0];
        assert_eq!(conv.input("Filter"), ["w".to_string()]);
        assert_eq!(conv.attr("strides"), Some(&Attribute::Ints(vec![1, 1])));
        assert_eq!(conv.attr("act"), Some(&Attribute::Str("relu".into())));
        assert_eq!(conv.attr("alpha"), Some(&Attribute::Float(0.5)));
        assert_eq!(conv.attr("fuse"), Some(&Attribute::Bool(true)));

        let concat = &parsed.program.ops[1];
        assert_eq!(concat.input("X"), ["y".to_string(), "x".to_string()]);
        assert_eq!(concat.attr("axis"), Some(&Attribute::Int(-1)));

        let copy = &parsed.kernels.kernels("io_copy")[0];
        assert_eq!(copy.alias(), "host_to_device");
        assert_eq!(copy.input_place().target, TargetType::Host);
        assert_eq!(copy.output_place().target, TargetType::Cuda);
        assert_eq!(parsed.kernels.kernels("conv2d")[0].alias(), "def");
    }

    #[test]
    fn test_parse_error_reports_line() {
        let text = "var x\nop relu(X=x) -> Out=y\n";
        match parse_program(text) {
            Err(CompileError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_statement() {
        assert!(matches!(
            parse_program("block b0"),
            Err(CompileError::Parse { line: 1, .. })
        ));
    }
}
