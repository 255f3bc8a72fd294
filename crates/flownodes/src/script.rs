//! Lua 5.4 script evaluator
//!
//! Each evaluation gets a fresh interpreter with only the `string`, `table`,
//! `math` and `utf8` libraries. `load`, `loadstring`, `dofile` and
//! `loadfile` are removed, and `console.log` writes to tracing.

use flowcore::{ScriptError, ScriptEvaluator};
use mlua::{Lua, LuaOptions, StdLib, Variadic};
use serde_json::{Map, Number, Value};

/// Globals removed from the sandbox
const BLOCKED_GLOBALS: [&str; 6] = ["load", "loadstring", "dofile", "loadfile", "require", "collectgarbage"];

/// Nesting limit when converting between Lua tables and JSON
const MAX_DEPTH: usize = 64;

#[derive(Debug, Default, Clone, Copy)]
pub struct LuaScriptEvaluator;

impl LuaScriptEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn sandbox() -> Result<Lua, ScriptError> {
        let lua = Lua::new_with(
            StdLib::STRING | StdLib::TABLE | StdLib::MATH | StdLib::UTF8,
            LuaOptions::new(),
        )
        .map_err(|e| ScriptError::Sandbox(e.to_string()))?;

        let setup = || -> mlua::Result<()> {
            let globals = lua.globals();
            for name in BLOCKED_GLOBALS {
                globals.set(name, mlua::Nil)?;
            }

            let log = lua.create_function(|_, args: Variadic<mlua::Value>| {
                let line = args
                    .iter()
                    .map(display_lua)
                    .collect::<Vec<_>>()
                    .join(" ");
                tracing::info!(target: "flownodes::script", "{}", line);
                Ok(())
            })?;
            let console = lua.create_table()?;
            console.set("log", log)?;
            globals.set("console", console)?;
            Ok(())
        };
        setup().map_err(|e| ScriptError::Sandbox(e.to_string()))?;
        Ok(lua)
    }
}

impl ScriptEvaluator for LuaScriptEvaluator {
    fn evaluate(&self, script: &str, bindings: &Map<String, Value>) -> Result<Value, ScriptError> {
        let lua = Self::sandbox()?;

        let globals = lua.globals();
        for (name, value) in bindings {
            let value = json_to_lua(&lua, value, 0).map_err(|e| ScriptError::Sandbox(e.to_string()))?;
            globals
                .set(name.as_str(), value)
                .map_err(|e| ScriptError::Sandbox(e.to_string()))?;
        }

        // A bare `return` in the script becomes the result.
        let wrapped = format!("return (function()\n{}\nend)()", script);
        let result = lua
            .load(wrapped.as_str())
            .set_name("condition")
            .eval::<mlua::Value>()
            .map_err(|e| match e {
                mlua::Error::SyntaxError { message, .. } => ScriptError::Parse(message),
                other => ScriptError::Runtime(other.to_string()),
            })?;

        lua_to_json(result, 0)
    }
}

fn json_to_lua(lua: &Lua, value: &Value, depth: usize) -> mlua::Result<mlua::Value> {
    if depth > MAX_DEPTH {
        return Err(mlua::Error::runtime("binding nested too deeply"));
    }
    Ok(match value {
        Value::Null => mlua::Value::Nil,
        Value::Bool(b) => mlua::Value::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => mlua::Value::Integer(i),
            None => mlua::Value::Number(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => mlua::Value::String(lua.create_string(s)?),
        Value::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, json_to_lua(lua, item, depth + 1)?)?;
            }
            mlua::Value::Table(table)
        }
        Value::Object(map) => {
            let table = lua.create_table()?;
            for (key, item) in map {
                table.raw_set(key.as_str(), json_to_lua(lua, item, depth + 1)?)?;
            }
            mlua::Value::Table(table)
        }
    })
}

/// Convert a script result. Tables with keys `1..n` become arrays, other
/// tables objects; functions and userdata cannot be exported.
fn lua_to_json(value: mlua::Value, depth: usize) -> Result<Value, ScriptError> {
    if depth > MAX_DEPTH {
        return Err(ScriptError::Export("result nested too deeply".to_string()));
    }
    match value {
        mlua::Value::Nil => Ok(Value::Null),
        mlua::Value::Boolean(b) => Ok(Value::Bool(b)),
        mlua::Value::Integer(i) => Ok(Value::Number(i.into())),
        mlua::Value::Number(f) => Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| ScriptError::Export(format!("non-finite number {}", f))),
        mlua::Value::String(s) => s
            .to_str()
            .map(|s| Value::String(s.to_string()))
            .map_err(|e| ScriptError::Export(e.to_string())),
        mlua::Value::Table(table) => {
            let len = table.raw_len();
            let pairs = table
                .pairs::<mlua::Value, mlua::Value>()
                .collect::<mlua::Result<Vec<_>>>()
                .map_err(|e| ScriptError::Export(e.to_string()))?;

            if len > 0 && pairs.len() == len {
                let mut items = Vec::with_capacity(len);
                for i in 1..=len {
                    let item = table
                        .raw_get::<mlua::Value>(i)
                        .map_err(|e| ScriptError::Export(e.to_string()))?;
                    items.push(lua_to_json(item, depth + 1)?);
                }
                return Ok(Value::Array(items));
            }

            let mut object = Map::new();
            for (key, item) in pairs {
                let key = match key {
                    mlua::Value::String(s) => s
                        .to_str()
                        .map(|s| s.to_string())
                        .map_err(|e| ScriptError::Export(e.to_string()))?,
                    mlua::Value::Integer(i) => i.to_string(),
                    mlua::Value::Number(f) => f.to_string(),
                    other => {
                        return Err(ScriptError::Export(format!(
                            "unsupported table key of type {}",
                            other.type_name()
                        )))
                    }
                };
                object.insert(key, lua_to_json(item, depth + 1)?);
            }
            Ok(Value::Object(object))
        }
        other => Err(ScriptError::Export(format!(
            "cannot export a {} value",
            other.type_name()
        ))),
    }
}

fn display_lua(value: &mlua::Value) -> String {
    match value {
        mlua::Value::Nil => "nil".to_string(),
        mlua::Value::Boolean(b) => b.to_string(),
        mlua::Value::Integer(i) => i.to_string(),
        mlua::Value::Number(f) => f.to_string(),
        mlua::Value::String(s) => s.to_string_lossy().to_string(),
        other => match lua_to_json(other.clone(), 0) {
            Ok(json) => json.to_string(),
            Err(_) => format!("<{}>", other.type_name()),
        },
    }
}
