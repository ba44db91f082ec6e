//! User function registry and resolution.
//!
//! Functions come in four shapes matching the operations that call them:
//! table (populate), column (compute), row (calculate) and group (roll,
//! aggregate). Native closures are registered by name or passed directly;
//! inline Lua text is compiled per operation execution and adapted to the
//! shape the operation asks for.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use mlua::LuaSerdeExt;
use parking_lot::Mutex;
use polars::prelude::*;
use tracing::debug;

use crate::error::{FlowError, FlowResult};
use crate::operation::{FunctionRef, Model};

pub type TableFn = Arc<dyn Fn(&[DataFrame], &Model) -> Result<DataFrame> + Send + Sync>;
pub type ColumnFn = Arc<dyn Fn(&DataFrame, &Model) -> Result<Series> + Send + Sync>;
pub type RowFn = Arc<dyn Fn(&[AnyValue<'_>], &Model) -> Result<AnyValue<'static>> + Send + Sync>;
pub type GroupFn = Arc<dyn Fn(&DataFrame, &Model) -> Result<AnyValue<'static>> + Send + Sync>;

#[derive(Clone)]
pub enum Udf {
    Table(TableFn),
    Column(ColumnFn),
    Row(RowFn),
    Group(GroupFn),
}

impl Udf {
    pub fn table<F>(f: F) -> Self where F: Fn(&[DataFrame], &Model) -> Result<DataFrame> + Send + Sync + 'static { Udf::Table(Arc::new(f)) }
    pub fn column<F>(f: F) -> Self where F: Fn(&DataFrame, &Model) -> Result<Series> + Send + Sync + 'static { Udf::Column(Arc::new(f)) }
    pub fn row<F>(f: F) -> Self where F: Fn(&[AnyValue<'_>], &Model) -> Result<AnyValue<'static>> + Send + Sync + 'static { Udf::Row(Arc::new(f)) }
    pub fn group<F>(f: F) -> Self where F: Fn(&DataFrame, &Model) -> Result<AnyValue<'static>> + Send + Sync + 'static { Udf::Group(Arc::new(f)) }

    pub fn shape(&self) -> Shape {
        match self {
            Udf::Table(_) => Shape::Table,
            Udf::Column(_) => Shape::Column,
            Udf::Row(_) => Shape::Row,
            Udf::Group(_) => Shape::Group,
        }
    }
}

impl fmt::Debug for Udf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Udf({})", self.shape()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape { Table, Column, Row, Group }

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self { Shape::Table => "table", Shape::Column => "column", Shape::Row => "row", Shape::Group => "group" })
    }
}

/// Named native functions, shared by clones.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    inner: Arc<Mutex<HashMap<String, Udf>>>,
}

impl FunctionRegistry {
    pub fn new() -> Self { Self::default() }

    /// Registry preloaded with `read_parquet`, `sum`, `mean` and `count`.
    pub fn with_builtins() -> Self {
        let reg = Self::new();
        reg.register("read_parquet", Udf::table(builtin_read_parquet));
        reg.register("sum", Udf::group(|df, _| builtin_reduce(df, Reduce::Sum)));
        reg.register("mean", Udf::group(|df, _| builtin_reduce(df, Reduce::Mean)));
        reg.register("count", Udf::group(|df, _| Ok(AnyValue::UInt64(df.height() as u64))));
        reg
    }

    #[inline]
    fn norm(name: &str) -> String { name.trim().to_ascii_lowercase() }

    pub fn register(&self, name: &str, udf: Udf) {
        debug!(target: "colflow::scripts", "register: name='{}' shape={}", name, udf.shape());
        self.inner.lock().insert(Self::norm(name), udf);
    }

    pub fn unregister(&self, name: &str) -> bool { self.inner.lock().remove(&Self::norm(name)).is_some() }

    pub fn has_function(&self, name: &str) -> bool { self.inner.lock().contains_key(&Self::norm(name)) }

    pub fn get(&self, name: &str) -> Option<Udf> { self.inner.lock().get(&Self::norm(name)).cloned() }

    pub fn names(&self) -> Vec<String> {
        let mut v: Vec<String> = self.inner.lock().keys().cloned().collect();
        v.sort();
        v
    }

    /// Turn a function reference into something callable. Unknown names and
    /// Lua text that does not evaluate to a function are configuration errors.
    pub fn resolve(&self, f: &FunctionRef) -> FlowResult<Callable> {
        match f {
            FunctionRef::Native(u) => Ok(Callable::Native(u.clone())),
            FunctionRef::Named(name) => self.get(name).map(Callable::Native).ok_or_else(|| {
                FlowError::config("function_not_found".to_string(), format!("function '{}' is not registered", name))
            }),
            FunctionRef::Lua(src) => LuaUdf::compile(src).map(Callable::Lua).map_err(|e| {
                FlowError::config("lua_compile".to_string(), format!("inline function does not evaluate to a function: {}", e))
            }),
        }
    }
}

/// A resolved function, valid for one operation execution.
pub enum Callable {
    Native(Udf),
    Lua(LuaUdf),
}

impl Callable {
    /// True when the function can only be applied one row at a time.
    pub fn is_row(&self) -> bool { matches!(self, Callable::Native(Udf::Row(_))) }

    fn wrong_shape(&self, want: Shape) -> FlowError {
        let got = match self { Callable::Native(u) => u.shape().to_string(), Callable::Lua(_) => "lua".to_string() };
        FlowError::config("function_shape".to_string(), format!("expected a {} function, got a {} function", want, got))
    }

    pub fn call_table(&self, inputs: &[DataFrame], model: &Model) -> FlowResult<DataFrame> {
        match self {
            Callable::Native(Udf::Table(f)) => Ok(f(inputs, model)?),
            Callable::Lua(l) => Ok(l.call_table(inputs, model)?),
            _ => Err(self.wrong_shape(Shape::Table)),
        }
    }

    pub fn call_column(&self, frame: &DataFrame, model: &Model) -> FlowResult<Series> {
        match self {
            Callable::Native(Udf::Column(f)) => Ok(f(frame, model)?),
            Callable::Lua(l) => Ok(l.call_column(frame, model)?),
            _ => Err(self.wrong_shape(Shape::Column)),
        }
    }

    pub fn call_row(&self, row: &[AnyValue<'_>], model: &Model) -> FlowResult<AnyValue<'static>> {
        match self {
            Callable::Native(Udf::Row(f)) => Ok(f(row, model)?),
            Callable::Lua(l) => Ok(l.call_row(row, model)?),
            _ => Err(self.wrong_shape(Shape::Row)),
        }
    }

    pub fn call_group(&self, frame: &DataFrame, model: &Model) -> FlowResult<AnyValue<'static>> {
        match self {
            Callable::Native(Udf::Group(f)) => Ok(f(frame, model)?),
            Callable::Lua(l) => Ok(l.call_group(frame, model)?),
            _ => Err(self.wrong_shape(Shape::Group)),
        }
    }
}

/// Inline Lua function kept alive in its own state.
///
/// Calling conventions (model arguments follow the data arguments):
/// - row: one argument per input value;
/// - column and group: one array per input column; a column
///   function returns an array, a group function a scalar;
/// - table: one `{column = array}` table per input frame; returns
///   a `{column = array}` table.
pub struct LuaUdf {
    lua: mlua::Lua,
    key: mlua::RegistryKey,
}

impl LuaUdf {
    pub fn compile(src: &str) -> Result<Self> {
        let lua = mlua::Lua::new();
        let key = {
            let func: mlua::Function = lua.load(src).eval()?;
            lua.create_registry_value(func)?
        };
        Ok(Self { lua, key })
    }

    fn function(&self) -> Result<mlua::Function<'_>> { Ok(self.lua.registry_value(&self.key)?) }

    /// Trailing arguments for a model: none for null, one per element for an
    /// array, a single value (a Lua table for an object) otherwise.
    fn model_args(&self, model: &Model) -> Result<Vec<mlua::Value<'_>>> {
        match model {
            Model::Null => Ok(Vec::new()),
            Model::Array(items) => items.iter().map(|v| Ok(self.lua.to_value(v)?)).collect(),
            other => Ok(vec![self.lua.to_value(other)?]),
        }
    }

    fn with_model<'lua>(&'lua self, model: &Model) -> Result<mlua::MultiValue<'lua>> {
        let mut args = mlua::MultiValue::new();
        for v in self.model_args(model)?.into_iter().rev() { args.push_front(v); }
        Ok(args)
    }

    pub fn call_row(&self, row: &[AnyValue<'_>], model: &Model) -> Result<AnyValue<'static>> {
        let mut args = self.with_model(model)?;
        for v in row.iter().rev() { args.push_front(any_to_lua(&self.lua, v)?); }
        let out: mlua::Value = self.function()?.call(args)?;
        lua_to_any(out)
    }

    fn column_args(&self, frame: &DataFrame, model: &Model) -> Result<mlua::MultiValue<'_>> {
        let mut args = self.with_model(model)?;
        for col in frame.get_columns().iter().rev() {
            args.push_front(mlua::Value::Table(series_to_lua(&self.lua, col.as_materialized_series())?));
        }
        Ok(args)
    }

    pub fn call_column(&self, frame: &DataFrame, model: &Model) -> Result<Series> {
        let args = self.column_args(frame, model)?;
        let out: mlua::Value = self.function()?.call(args)?;
        match out {
            mlua::Value::Table(t) => lua_array_to_series("", &t),
            other => Err(anyhow!("column function must return an array, got {}", other.type_name())),
        }
    }

    pub fn call_group(&self, frame: &DataFrame, model: &Model) -> Result<AnyValue<'static>> {
        let args = self.column_args(frame, model)?;
        let out: mlua::Value = self.function()?.call(args)?;
        lua_to_any(out)
    }

    pub fn call_table(&self, inputs: &[DataFrame], model: &Model) -> Result<DataFrame> {
        let mut args = self.with_model(model)?;
        for df in inputs.iter().rev() {
            let t = self.lua.create_table()?;
            for col in df.get_columns() {
                t.set(col.name().as_str(), series_to_lua(&self.lua, col.as_materialized_series())?)?;
            }
            args.push_front(mlua::Value::Table(t));
        }
        let out: mlua::Value = self.function()?.call(args)?;
        let mlua::Value::Table(t) = out else {
            return Err(anyhow!("table function must return a table of columns"));
        };
        let mut names: Vec<String> = Vec::new();
        for pair in t.clone().pairs::<String, mlua::Value>() {
            let (k, _) = pair?;
            names.push(k);
        }
        names.sort();
        let mut cols: Vec<Column> = Vec::with_capacity(names.len());
        for n in names.iter() {
            let arr: mlua::Table = t.get(n.as_str())?;
            cols.push(lua_array_to_series(n, &arr)?.into());
        }
        Ok(DataFrame::new(cols)?)
    }
}

fn any_to_lua<'lua>(lua: &'lua mlua::Lua, v: &AnyValue<'_>) -> Result<mlua::Value<'lua>> {
    use mlua::Value as LVal;
    let lv = match v {
        AnyValue::Null => LVal::Nil,
        AnyValue::Boolean(b) => LVal::Boolean(*b),
        AnyValue::Int8(i) => LVal::Integer(*i as i64),
        AnyValue::Int16(i) => LVal::Integer(*i as i64),
        AnyValue::Int32(i) => LVal::Integer(*i as i64),
        AnyValue::Int64(i) => LVal::Integer(*i),
        AnyValue::UInt8(i) => LVal::Integer(*i as i64),
        AnyValue::UInt16(i) => LVal::Integer(*i as i64),
        AnyValue::UInt32(i) => LVal::Integer(*i as i64),
        AnyValue::UInt64(i) => LVal::Integer(*i as i64),
        AnyValue::Float32(f) => LVal::Number(*f as f64),
        AnyValue::Float64(f) => LVal::Number(*f),
        AnyValue::String(s) => LVal::String(lua.create_string(s)?),
        AnyValue::StringOwned(s) => LVal::String(lua.create_string(s.as_str())?),
        other => LVal::String(lua.create_string(other.to_string())?),
    };
    Ok(lv)
}

fn series_to_lua<'lua>(lua: &'lua mlua::Lua, s: &Series) -> Result<mlua::Table<'lua>> {
    let tbl = lua.create_table()?;
    for i in 0..s.len() {
        tbl.set((i + 1) as i64, any_to_lua(lua, &s.get(i)?)?)?;
    }
    Ok(tbl)
}

fn lua_to_any(v: mlua::Value) -> Result<AnyValue<'static>> {
    use mlua::Value as LVal;
    let av = match v {
        LVal::Nil => AnyValue::Null,
        LVal::Boolean(b) => AnyValue::Boolean(b),
        LVal::Integer(i) => AnyValue::Int64(i),
        LVal::Number(f) => AnyValue::Float64(f),
        LVal::String(s) => AnyValue::StringOwned(s.to_str()?.into()),
        other => return Err(anyhow!("unsupported Lua value of type {}", other.type_name())),
    };
    Ok(av)
}

fn lua_array_to_series(name: &str, t: &mlua::Table) -> Result<Series> {
    let n = t.raw_len();
    let mut vals: Vec<AnyValue<'static>> = Vec::with_capacity(n);
    for i in 1..=n {
        vals.push(lua_to_any(t.raw_get::<_, mlua::Value>(i as i64)?)?);
    }
    Ok(Series::from_any_values(name.into(), &vals, false)?)
}

fn builtin_read_parquet(_inputs: &[DataFrame], model: &Model) -> Result<DataFrame> {
    let path = model.get("path").and_then(|p| p.as_str())
        .or_else(|| model.as_str())
        .ok_or_else(|| anyhow!("read_parquet expects a model with a 'path'"))?;
    let file = std::fs::File::open(path).map_err(|e| anyhow!("read_parquet: cannot open '{}': {}", path, e))?;
    Ok(ParquetReader::new(file).finish()?)
}

enum Reduce { Sum, Mean }

fn builtin_reduce(df: &DataFrame, how: Reduce) -> Result<AnyValue<'static>> {
    let Some(col) = df.get_columns().first() else { return Ok(AnyValue::Null) };
    let s = col.as_materialized_series().cast(&DataType::Float64)?;
    let ca = s.f64()?;
    let out = match how {
        Reduce::Sum => ca.sum(),
        Reduce::Mean => ca.mean(),
    };
    Ok(out.map(AnyValue::Float64).unwrap_or(AnyValue::Null))
}
