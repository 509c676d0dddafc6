// Metamethod resolution and invocation.
//
// Every metamethod call goes through the prep-call helpers here: push the
// handler and its arguments above the current frame's register window,
// run the standard call machinery, and move the result (if any) back to
// the target slot.

use crate::gc::TableId;
use crate::lua_value::LuaValue;
use crate::lua_vm::execute::call::call_value;
use crate::lua_vm::{LuaResult, LuaState};

/// Metamethod events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TmKind {
    Index = 0,
    NewIndex,
    Eq,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Unm,
    Lt,
    Le,
    Concat,
    Call,
    N, // number of events
}

impl TmKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        if value < TmKind::N as u8 {
            Some(unsafe { std::mem::transmute::<u8, TmKind>(value) })
        } else {
            None
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            TmKind::Index => "__index",
            TmKind::NewIndex => "__newindex",
            TmKind::Eq => "__eq",
            TmKind::Add => "__add",
            TmKind::Sub => "__sub",
            TmKind::Mul => "__mul",
            TmKind::Div => "__div",
            TmKind::Pow => "__pow",
            TmKind::Unm => "__unm",
            TmKind::Lt => "__lt",
            TmKind::Le => "__le",
            TmKind::Concat => "__concat",
            TmKind::Call => "__call",
            TmKind::N => "__n",
        }
    }
}

/// Metatable of a value: only tables and userdata carry one.
pub fn get_metatable(s: &LuaState, v: &LuaValue) -> Option<TableId> {
    let pool = &s.vm().pool;
    if let Some(t) = v.as_table_id() {
        pool.table(t).metatable
    } else if v.is_userdata() {
        pool.userdata(v.uvalue()).metatable
    } else {
        None
    }
}

/// Event handler out of a metatable; nil when absent.
pub fn fast_tm(s: &LuaState, mt: Option<TableId>, event: TmKind) -> LuaValue {
    let Some(mt) = mt else {
        return LuaValue::nil();
    };
    let key = s.vm().const_strings.tm_value(event);
    s.vm().pool.table(mt).raw_get(&key)
}

/// Event handler of a value (through its metatable); nil when absent.
pub fn get_tm_by_obj(s: &LuaState, v: &LuaValue, event: TmKind) -> LuaValue {
    fast_tm(s, get_metatable(s, v), event)
}

/// Call a metamethod expecting one result.
pub fn call_tm_res(
    s: &mut LuaState,
    f: LuaValue,
    p1: LuaValue,
    p2: LuaValue,
) -> LuaResult<LuaValue> {
    // push above the register window so live registers survive the call
    if let Some(frame) = s.current_frame() {
        let top = frame.top;
        s.set_top(top);
    }
    let func_pos = s.get_top();
    s.push_value(f);
    s.push_value(p1);
    s.push_value(p2);
    call_value(s, func_pos, 1)?;
    let res = s.stack_get(func_pos);
    s.set_top(func_pos);
    Ok(res)
}

/// Call a metamethod for effect only (index writes).
pub fn call_tm(
    s: &mut LuaState,
    f: LuaValue,
    p1: LuaValue,
    p2: LuaValue,
    p3: LuaValue,
) -> LuaResult<()> {
    if let Some(frame) = s.current_frame() {
        let top = frame.top;
        s.set_top(top);
    }
    let func_pos = s.get_top();
    s.push_value(f);
    s.push_value(p1);
    s.push_value(p2);
    s.push_value(p3);
    call_value(s, func_pos, 0)?;
    s.set_top(func_pos);
    Ok(())
}

/// Binary event dispatch: try the first operand's handler, then the
/// second's. `None` when neither side has one.
pub fn call_bin_tm(
    s: &mut LuaState,
    p1: LuaValue,
    p2: LuaValue,
    event: TmKind,
) -> LuaResult<Option<LuaValue>> {
    let mut tm = get_tm_by_obj(s, &p1, event);
    if tm.is_nil() {
        tm = get_tm_by_obj(s, &p2, event);
    }
    if !tm.is_function() {
        return Ok(None);
    }
    Ok(Some(call_tm_res(s, tm, p1, p2)?))
}

/// Equality handler: both values must supply the *same* `__eq` (the
/// metatables may differ as long as the handlers are raw-equal).
fn get_comp_tm(
    s: &LuaState,
    mt1: Option<TableId>,
    mt2: Option<TableId>,
) -> LuaValue {
    let tm1 = fast_tm(s, mt1, TmKind::Eq);
    if tm1.is_nil() {
        return LuaValue::nil();
    }
    if mt1 == mt2 {
        return tm1;
    }
    let tm2 = fast_tm(s, mt2, TmKind::Eq);
    if tm2.is_nil() {
        return LuaValue::nil();
    }
    if tm1.raw_equal(&tm2) { tm1 } else { LuaValue::nil() }
}

/// Ordering handler: both operands must supply the same handler for the
/// event. `None` means "no metamethod".
fn call_order_tm(
    s: &mut LuaState,
    p1: LuaValue,
    p2: LuaValue,
    event: TmKind,
) -> LuaResult<Option<bool>> {
    let tm1 = get_tm_by_obj(s, &p1, event);
    if tm1.is_nil() {
        return Ok(None);
    }
    let tm2 = get_tm_by_obj(s, &p2, event);
    if !tm1.raw_equal(&tm2) {
        return Ok(None);
    }
    let r = call_tm_res(s, tm1, p1, p2)?;
    Ok(Some(r.is_truthy()))
}

/// Full equality: raw equality, then the `__eq` protocol for same-typed
/// tables and userdata.
pub fn equal_obj(s: &mut LuaState, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
    if a.tt != b.tt {
        return Ok(false);
    }
    if a.raw_equal(&b) {
        return Ok(true);
    }
    // only tables and userdata get the metamethod protocol
    let (mt1, mt2) = if a.is_table() || a.is_userdata() {
        (get_metatable(s, &a), get_metatable(s, &b))
    } else {
        return Ok(false);
    };
    let tm = get_comp_tm(s, mt1, mt2);
    if tm.is_nil() {
        return Ok(false);
    }
    let r = call_tm_res(s, tm, a, b)?;
    Ok(r.is_truthy())
}

/// Bytewise string comparison through the pool.
fn string_less(s: &LuaState, a: &LuaValue, b: &LuaValue, or_equal: bool) -> bool {
    let pool = &s.vm().pool;
    let sa = pool.get_string(a.tsvalue()).as_bytes();
    let sb = pool.get_string(b.tsvalue()).as_bytes();
    if or_equal { sa <= sb } else { sa < sb }
}

/// `<` with the ordering protocol.
pub fn less_than(s: &mut LuaState, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
    if a.ttype() != b.ttype() {
        return Err(s.order_error(&a, &b));
    }
    if a.is_number() {
        return Ok(a.nvalue() < b.nvalue());
    }
    if a.is_string() {
        return Ok(string_less(s, &a, &b, false));
    }
    match call_order_tm(s, a, b, TmKind::Lt)? {
        Some(r) => Ok(r),
        None => Err(s.order_error(&a, &b)),
    }
}

/// `<=` with the ordering protocol; without `__le` it falls back to
/// `not (b < a)` via `__lt`.
pub fn less_equal(s: &mut LuaState, a: LuaValue, b: LuaValue) -> LuaResult<bool> {
    if a.ttype() != b.ttype() {
        return Err(s.order_error(&a, &b));
    }
    if a.is_number() {
        return Ok(a.nvalue() <= b.nvalue());
    }
    if a.is_string() {
        return Ok(string_less(s, &a, &b, true));
    }
    if let Some(r) = call_order_tm(s, a, b, TmKind::Le)? {
        return Ok(r);
    }
    if let Some(r) = call_order_tm(s, b, a, TmKind::Lt)? {
        return Ok(!r);
    }
    Err(s.order_error(&a, &b))
}

// ===== Coercions =====

/// to-number: numbers pass through, strings go through the numeric
/// scanner.
pub fn to_number(s: &LuaState, v: &LuaValue) -> Option<f64> {
    if v.is_number() {
        return Some(v.nvalue());
    }
    if v.is_string() {
        let bytes = s.vm().pool.get_string(v.tsvalue());
        return crate::lua_value::str_to_number(bytes.as_bytes());
    }
    None
}

/// to-string: strings pass through, numbers are formatted and interned.
pub fn to_string_value(s: &mut LuaState, v: &LuaValue) -> Option<LuaValue> {
    if v.is_string() {
        return Some(*v);
    }
    if v.is_number() {
        let text = crate::lua_value::number_to_str(v.nvalue());
        return Some(s.vm_mut().create_string(&text));
    }
    None
}

/// Binary arithmetic slow path: coerce to numbers, else dispatch the
/// event; `__pow` on two numbers is routed through the global handler.
pub fn arith(
    s: &mut LuaState,
    result_idx: usize,
    rb: LuaValue,
    rc: LuaValue,
    event: TmKind,
    globals: LuaValue,
) -> LuaResult<()> {
    let nb = to_number(s, &rb);
    let nc = to_number(s, &rc);
    if let (Some(b), Some(c)) = (nb, nc) {
        let r = match event {
            TmKind::Add => b + c,
            TmKind::Sub => b - c,
            TmKind::Mul => b * c,
            TmKind::Div => b / c,
            TmKind::Pow => {
                // exponentiation is delegated to the global handler
                let key = s.vm().const_strings.tm_value(TmKind::Pow);
                let f = s.vm().pool.table(globals.hvalue()).raw_get(&key);
                if !f.is_function() {
                    return Err(
                        s.rt_error("`__pow' (`^' operator) is not a function")
                    );
                }
                let r = call_tm_res(s, f, LuaValue::number(b), LuaValue::number(c))?;
                s.stack_set(result_idx, r);
                return Ok(());
            }
            _ => unreachable!("not an arithmetic event"),
        };
        s.stack_set(result_idx, LuaValue::number(r));
        return Ok(());
    }
    match call_bin_tm(s, rb, rc, event)? {
        Some(r) => {
            s.stack_set(result_idx, r);
            Ok(())
        }
        None => Err(s.arith_error(&rb, &rc)),
    }
}
