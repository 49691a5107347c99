//! # Command Dispatch
//!
//! Parse a decoded request frame, execute it against the keyspace, and
//! produce the typed reply for the wire layer to encode.
//!
//! Command names are case-insensitive. Arity and argument-parse failures
//! reply `BadArgument`, unrecognized names reply `UnknownCommand`, and kind
//! mismatches reply `BadType`; all three keep the connection open.

use zkv_common::{Reply, Status};
use zkv_store::{Store, TtlState, Value, ZQUERY_MAX};

/// Executes one command against the store. `now_us` is the reactor's clock
/// for this tick, used by the TTL commands.
pub fn dispatch(store: &mut Store, args: &[Vec<u8>], now_us: u64) -> (Status, Reply) {
    let Some(name) = args.first() else {
        return (Status::BadArgument, Reply::Nil);
    };

    if name.eq_ignore_ascii_case(b"GET") {
        do_get(store, args)
    } else if name.eq_ignore_ascii_case(b"SET") {
        do_set(store, args)
    } else if name.eq_ignore_ascii_case(b"DEL") {
        do_del(store, args)
    } else if name.eq_ignore_ascii_case(b"KEYS") {
        do_keys(store, args)
    } else if name.eq_ignore_ascii_case(b"EXPIRE") {
        do_expire(store, args, now_us)
    } else if name.eq_ignore_ascii_case(b"PERSIST") {
        do_persist(store, args)
    } else if name.eq_ignore_ascii_case(b"TTL") {
        do_ttl(store, args, now_us)
    } else if name.eq_ignore_ascii_case(b"ZADD") {
        do_zadd(store, args)
    } else if name.eq_ignore_ascii_case(b"ZREM") {
        do_zrem(store, args)
    } else if name.eq_ignore_ascii_case(b"ZSCORE") {
        do_zscore(store, args)
    } else if name.eq_ignore_ascii_case(b"ZQUERY") {
        do_zquery(store, args)
    } else {
        (Status::UnknownCommand, Reply::Nil)
    }
}

fn do_get(store: &mut Store, args: &[Vec<u8>]) -> (Status, Reply) {
    if args.len() != 2 {
        return (Status::BadArgument, Reply::Nil);
    }
    match store.get(&args[1]) {
        None => (Status::Ok, Reply::Nil),
        Some(Value::Bytes(data)) => (Status::Ok, Reply::Str(data.clone())),
        Some(Value::Sorted(_)) => (Status::BadType, Reply::Nil),
    }
}

fn do_set(store: &mut Store, args: &[Vec<u8>]) -> (Status, Reply) {
    if args.len() != 3 {
        return (Status::BadArgument, Reply::Nil);
    }
    match store.set_bytes(&args[1], args[2].clone()) {
        Ok(()) => (Status::Ok, Reply::Nil),
        Err(_) => (Status::BadType, Reply::Nil),
    }
}

fn do_del(store: &mut Store, args: &[Vec<u8>]) -> (Status, Reply) {
    if args.len() != 2 {
        return (Status::BadArgument, Reply::Nil);
    }
    (Status::Ok, Reply::Int(store.remove(&args[1]) as i64))
}

fn do_keys(store: &mut Store, args: &[Vec<u8>]) -> (Status, Reply) {
    if args.len() != 1 {
        return (Status::BadArgument, Reply::Nil);
    }
    let keys = store.keys().into_iter().map(Reply::Str).collect();
    (Status::Ok, Reply::Arr(keys))
}

fn do_expire(store: &mut Store, args: &[Vec<u8>], now_us: u64) -> (Status, Reply) {
    if args.len() != 3 {
        return (Status::BadArgument, Reply::Nil);
    }
    let Some(ms) = parse_i64(&args[2]) else {
        return (Status::BadArgument, Reply::Nil);
    };
    // A non-positive delay still schedules: the key dies on the next tick.
    let when_us = now_us.saturating_add_signed(ms.saturating_mul(1000));
    (Status::Ok, Reply::Int(store.set_ttl(&args[1], when_us) as i64))
}

fn do_persist(store: &mut Store, args: &[Vec<u8>]) -> (Status, Reply) {
    if args.len() != 2 {
        return (Status::BadArgument, Reply::Nil);
    }
    (Status::Ok, Reply::Int(store.clear_ttl(&args[1]) as i64))
}

fn do_ttl(store: &mut Store, args: &[Vec<u8>], now_us: u64) -> (Status, Reply) {
    if args.len() != 2 {
        return (Status::BadArgument, Reply::Nil);
    }
    let value = match store.ttl_state(&args[1], now_us) {
        TtlState::Missing => -2,
        TtlState::NoExpiry => -1,
        TtlState::ExpiresInMs(ms) => ms,
    };
    (Status::Ok, Reply::Int(value))
}

fn do_zadd(store: &mut Store, args: &[Vec<u8>]) -> (Status, Reply) {
    if args.len() != 4 {
        return (Status::BadArgument, Reply::Nil);
    }
    let Some(score) = parse_score(&args[2]) else {
        return (Status::BadArgument, Reply::Nil);
    };
    match store.sorted_or_create(&args[1]) {
        Ok(zset) => (Status::Ok, Reply::Int(zset.insert(&args[3], score) as i64)),
        Err(_) => (Status::BadType, Reply::Nil),
    }
}

fn do_zrem(store: &mut Store, args: &[Vec<u8>]) -> (Status, Reply) {
    if args.len() != 3 {
        return (Status::BadArgument, Reply::Nil);
    }
    match store.sorted(&args[1]) {
        Ok(None) => (Status::Ok, Reply::Int(0)),
        Ok(Some(zset)) => (Status::Ok, Reply::Int(zset.remove(&args[2]) as i64)),
        Err(_) => (Status::BadType, Reply::Nil),
    }
}

fn do_zscore(store: &mut Store, args: &[Vec<u8>]) -> (Status, Reply) {
    if args.len() != 3 {
        return (Status::BadArgument, Reply::Nil);
    }
    match store.sorted(&args[1]) {
        Ok(None) => (Status::Ok, Reply::Nil),
        Ok(Some(zset)) => match zset.score(&args[2]) {
            Some(score) => (Status::Ok, Reply::Dbl(score)),
            None => (Status::Ok, Reply::Nil),
        },
        Err(_) => (Status::BadType, Reply::Nil),
    }
}

fn do_zquery(store: &mut Store, args: &[Vec<u8>]) -> (Status, Reply) {
    if args.len() != 6 {
        return (Status::BadArgument, Reply::Nil);
    }
    let (Some(score), Some(offset), Some(limit)) = (
        parse_score(&args[2]),
        parse_i64(&args[4]),
        parse_i64(&args[5]),
    ) else {
        return (Status::BadArgument, Reply::Nil);
    };
    let limit = limit.max(0) as usize;

    match store.sorted(&args[1]) {
        Ok(None) => (Status::Ok, Reply::Arr(Vec::new())),
        Ok(Some(zset)) => {
            let rows = zset.query(score, &args[3], offset, limit.min(ZQUERY_MAX));
            let mut out = Vec::with_capacity(rows.len() * 2);
            for (name, score) in rows {
                out.push(Reply::Str(name));
                out.push(Reply::Dbl(score));
            }
            (Status::Ok, Reply::Arr(out))
        }
        Err(_) => (Status::BadType, Reply::Nil),
    }
}

fn parse_i64(arg: &[u8]) -> Option<i64> {
    std::str::from_utf8(arg).ok()?.parse().ok()
}

/// Scores parse as doubles; NaN is rejected because it has no place in the
/// (score, name) order.
fn parse_score(arg: &[u8]) -> Option<f64> {
    let value: f64 = std::str::from_utf8(arg).ok()?.parse().ok()?;
    (!value.is_nan()).then_some(value)
}
