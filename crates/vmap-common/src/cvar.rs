// cvar.rs - named configuration variables
//
// Settings live in a flat registry of string variables with a cached
// float value. Text configs use the console form `set <name> <value>`.

use std::collections::HashMap;
use std::io::Write;

use bitflags::bitflags;
use tracing::{debug, warn};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct CvarFlags: u32 {
        /// Written out by `write_variables`.
        const ARCHIVE = 0x1;
        /// Only changeable through `force_set`.
        const NOSET   = 0x2;
    }
}

#[derive(Clone, Debug)]
pub struct Cvar {
    pub name: String,
    pub string: String,
    pub flags: CvarFlags,
    pub modified: bool,
    pub value: f32,
}

#[derive(Default)]
pub struct CvarContext {
    pub cvar_vars: Vec<Cvar>,
    /// name -> index in cvar_vars
    cvar_index: HashMap<String, usize>,
}

impl CvarContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_var(&self, name: &str) -> Option<&Cvar> {
        self.cvar_index.get(name).map(|&idx| &self.cvar_vars[idx])
    }

    /// Float value of a cvar, 0 if it does not exist.
    pub fn variable_value(&self, name: &str) -> f32 {
        self.find_var(name).map_or(0.0, |var| var.value)
    }

    /// String value of a cvar, "" if it does not exist.
    pub fn variable_string(&self, name: &str) -> &str {
        self.find_var(name).map_or("", |var| var.string.as_str())
    }

    pub fn variable_bool(&self, name: &str) -> bool {
        self.variable_value(name) != 0.0
    }

    /// Get or create a cvar. An existing cvar keeps its value and only has
    /// the flags OR'd in.
    pub fn get(&mut self, name: &str, default: &str, flags: CvarFlags) -> usize {
        if let Some(&idx) = self.cvar_index.get(name) {
            self.cvar_vars[idx].flags |= flags;
            return idx;
        }

        let idx = self.cvar_vars.len();
        self.cvar_vars.push(Cvar {
            name: name.to_string(),
            string: default.to_string(),
            flags,
            modified: true,
            value: parse_value(default),
        });
        self.cvar_index.insert(name.to_string(), idx);
        idx
    }

    fn set2(&mut self, name: &str, value: &str, force: bool) -> usize {
        let idx = match self.cvar_index.get(name) {
            Some(&idx) => idx,
            None => return self.get(name, value, CvarFlags::empty()),
        };

        let var = &mut self.cvar_vars[idx];
        if !force && var.flags.contains(CvarFlags::NOSET) {
            warn!("{} is write protected", name);
            return idx;
        }
        if var.string == value {
            return idx;
        }

        var.modified = true;
        var.string = value.to_string();
        var.value = parse_value(value);
        idx
    }

    /// Set a cvar, respecting NOSET.
    pub fn set(&mut self, name: &str, value: &str) -> usize {
        self.set2(name, value, false)
    }

    pub fn force_set(&mut self, name: &str, value: &str) -> usize {
        self.set2(name, value, true)
    }

    pub fn set_value(&mut self, name: &str, value: f32) -> usize {
        let val_str = if value == (value as i32) as f32 {
            format!("{}", value as i32)
        } else {
            format!("{}", value)
        };
        self.set(name, &val_str)
    }

    /// Execute config text. Only `set` lines are understood; `//` starts a
    /// comment. Returns the number of variables assigned.
    pub fn exec_config(&mut self, text: &str) -> usize {
        let mut assigned = 0;
        for (lineno, line) in text.lines().enumerate() {
            let line = match line.find("//") {
                Some(pos) => &line[..pos],
                None => line,
            };
            let args = tokenize(line);
            if args.is_empty() {
                continue;
            }
            if args[0] != "set" || args.len() != 3 {
                warn!("config line {}: expected `set <variable> <value>`", lineno + 1);
                continue;
            }
            debug!("config: {} = \"{}\"", args[1], args[2]);
            self.set(&args[1], &args[2]);
            assigned += 1;
        }
        assigned
    }

    /// Write all archived cvars back out in config form.
    pub fn write_variables(&self, writer: &mut dyn Write) -> std::io::Result<()> {
        for var in &self.cvar_vars {
            if var.flags.contains(CvarFlags::ARCHIVE) {
                writeln!(writer, "set {} \"{}\"", var.name, var.string)?;
            }
        }
        Ok(())
    }
}

fn parse_value(s: &str) -> f32 {
    s.trim().parse::<f32>().unwrap_or(0.0)
}

/// Whitespace separated tokens, double quotes group.
fn tokenize(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let Some(&first) = chars.peek() else { break };
        let mut token = String::new();
        if first == '"' {
            chars.next();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                token.push(c);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
        }
        out.push(token);
    }
    out
}
