//! Math library

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::runtime::value::{float_to_int, Value};
use crate::std::{check_f64, check_int, check_number, NativeContext, NativeExport, NativeOutcome, StdModule};
use crate::vm::{bad_argument, VMError, VMResult};

// ============================================================================
// MathModule - StdModule Implementation
// ============================================================================

pub struct MathModule;

impl StdModule for MathModule {
    fn module_path(&self) -> &str {
        "math"
    }

    fn exports(&self) -> Vec<NativeExport> {
        vec![
            NativeExport::new("abs", "math.abs", "(x) -> number", native_abs),
            NativeExport::new("floor", "math.floor", "(x) -> integer", native_floor),
            NativeExport::new("ceil", "math.ceil", "(x) -> integer", native_ceil),
            NativeExport::new("sqrt", "math.sqrt", "(x) -> float", native_sqrt),
            NativeExport::new("sin", "math.sin", "(x) -> float", native_sin),
            NativeExport::new("cos", "math.cos", "(x) -> float", native_cos),
            NativeExport::new("tan", "math.tan", "(x) -> float", native_tan),
            NativeExport::new("exp", "math.exp", "(x) -> float", native_exp),
            NativeExport::new("log", "math.log", "(x, base?) -> float", native_log),
            NativeExport::new("min", "math.min", "(x, ...) -> number", native_min),
            NativeExport::new("max", "math.max", "(x, ...) -> number", native_max),
            NativeExport::new("fmod", "math.fmod", "(x, y) -> number", native_fmod),
            NativeExport::new("modf", "math.modf", "(x) -> (float, float)", native_modf),
            NativeExport::new(
                "tointeger",
                "math.tointeger",
                "(x) -> integer | nil",
                native_tointeger,
            ),
            NativeExport::new(
                "random",
                "math.random",
                "(m?, n?) -> number",
                native_random,
            ),
            NativeExport::new(
                "randomseed",
                "math.randomseed",
                "(x) -> ()",
                native_randomseed,
            ),
        ]
    }

    fn constants(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("pi", Value::Float(std::f64::consts::PI)),
            ("huge", Value::Float(f64::INFINITY)),
            ("maxinteger", Value::Int(i64::MAX)),
            ("mininteger", Value::Int(i64::MIN)),
        ]
    }
}

/// Singleton instance for the math library.
pub const MATH_MODULE: MathModule = MathModule;

// ============================================================================
// Native Function Implementations
// ============================================================================

fn one(value: Value) -> VMResult<NativeOutcome> {
    Ok(NativeOutcome::Return(vec![value]))
}

/// Float result converted to an integer when it fits, as `floor`/`ceil` do
fn integral(f: f64) -> Value {
    float_to_int(f).map(Value::Int).unwrap_or(Value::Float(f))
}

fn native_abs(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    match check_number(args, 0, "abs")? {
        Value::Int(i) => one(Value::Int(i.wrapping_abs())),
        other => one(Value::Float(other.as_f64().unwrap_or(f64::NAN).abs())),
    }
}

fn native_floor(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    match check_number(args, 0, "floor")? {
        Value::Int(i) => one(Value::Int(i)),
        other => one(integral(other.as_f64().unwrap_or(f64::NAN).floor())),
    }
}

fn native_ceil(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    match check_number(args, 0, "ceil")? {
        Value::Int(i) => one(Value::Int(i)),
        other => one(integral(other.as_f64().unwrap_or(f64::NAN).ceil())),
    }
}

fn native_sqrt(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    one(Value::Float(check_f64(args, 0, "sqrt")?.sqrt()))
}

fn native_sin(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    one(Value::Float(check_f64(args, 0, "sin")?.sin()))
}

fn native_cos(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    one(Value::Float(check_f64(args, 0, "cos")?.cos()))
}

fn native_tan(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    one(Value::Float(check_f64(args, 0, "tan")?.tan()))
}

fn native_exp(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    one(Value::Float(check_f64(args, 0, "exp")?.exp()))
}

fn native_log(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let x = check_f64(args, 0, "log")?;
    let result = match args.get(1) {
        None | Some(Value::Nil) => x.ln(),
        Some(_) => {
            let base = check_f64(args, 1, "log")?;
            if base == 2.0 {
                x.log2()
            } else if base == 10.0 {
                x.log10()
            } else {
                x.ln() / base.ln()
            }
        }
    };
    one(Value::Float(result))
}

fn extremum(
    args: &[Value],
    fname: &str,
    pick_rhs: fn(f64, f64) -> bool,
) -> VMResult<NativeOutcome> {
    let mut best = check_number(args, 0, fname)?;
    for n in 1..args.len() {
        let candidate = check_number(args, n, fname)?;
        let a = best.as_f64().unwrap_or(f64::NAN);
        let b = candidate.as_f64().unwrap_or(f64::NAN);
        if pick_rhs(a, b) {
            best = candidate;
        }
    }
    one(best)
}

fn native_min(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    extremum(args, "min", |a, b| b < a)
}

fn native_max(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    extremum(args, "max", |a, b| b > a)
}

fn native_fmod(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let a = check_number(args, 0, "fmod")?;
    let b = check_number(args, 1, "fmod")?;
    match (a, b) {
        (Value::Int(_), Value::Int(0)) => Err(bad_argument(2, "fmod", "zero")),
        (Value::Int(x), Value::Int(y)) => one(Value::Int(x.wrapping_rem(y))),
        (x, y) => one(Value::Float(
            x.as_f64().unwrap_or(f64::NAN) % y.as_f64().unwrap_or(f64::NAN),
        )),
    }
}

fn native_modf(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let x = check_f64(args, 0, "modf")?;
    let whole = if x.is_infinite() { x } else { x.trunc() };
    let frac = if x.is_infinite() { 0.0 } else { x - whole };
    Ok(NativeOutcome::Return(vec![Value::Float(whole), Value::Float(frac)]))
}

fn native_tointeger(
    args: &[Value],
    _ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let value = match args.first() {
        Some(Value::Int(i)) => Value::Int(*i),
        Some(Value::Float(f)) => float_to_int(*f).map(Value::Int).unwrap_or_default(),
        _ => Value::Nil,
    };
    one(value)
}

fn native_random(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let (low, high) = match args.len() {
        0 => return one(Value::Float(ctx.rng.random::<f64>())),
        1 => (1, check_int(args, 0, "random")?),
        _ => (check_int(args, 0, "random")?, check_int(args, 1, "random")?),
    };
    if low > high {
        return Err(bad_argument(args.len(), "random", "interval is empty"));
    }
    one(Value::Int(ctx.rng.random_range(low..=high)))
}

fn native_randomseed(
    args: &[Value],
    ctx: &mut NativeContext<'_, '_>,
) -> VMResult<NativeOutcome> {
    let seed = match check_number(args, 0, "randomseed")? {
        Value::Int(i) => i as u64,
        Value::Float(f) => f.to_bits(),
        _ => return Err(VMError::runtime("bad seed")),
    };
    *ctx.rng = StdRng::seed_from_u64(seed);
    Ok(NativeOutcome::Return(Vec::new()))
}
