//! Frame validation, ported field-for-field from
//! `original_source/app/collectors/validation.py`. Rejects malformed
//! frames before they reach the Raw Store.

use serde_json::Value;

use crate::models::canonical_symbol;

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

pub struct ValidKline<'a> {
    pub symbol: String,
    pub timeframe: &'a str,
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub base_vol: f64,
    pub quote_vol: f64,
    pub closed: bool,
}

/// `data.k` payload of a `<symbol>@kline_<interval>` frame.
pub fn validate_kline<'a>(stream: &'a str, data: &Value) -> Option<ValidKline<'a>> {
    let timeframe = stream.split("@kline_").nth(1)?;
    let k = data.get("k")?;
    let symbol = canonical_symbol(k.get("s")?.as_str()?);
    let open = as_f64(k.get("o")?)?;
    let high = as_f64(k.get("h")?)?;
    let low = as_f64(k.get("l")?)?;
    let close = as_f64(k.get("c")?)?;
    let base_vol = as_f64(k.get("v")?).unwrap_or(0.0);
    let quote_vol = as_f64(k.get("q")?).unwrap_or(0.0);
    let open_time = k.get("t")?.as_i64()?;
    let closed = k.get("x")?.as_bool()?;
    Some(ValidKline {
        symbol,
        timeframe,
        open_time,
        open,
        high,
        low,
        close,
        base_vol,
        quote_vol,
        closed,
    })
}

pub struct ValidDepth {
    pub symbol: String,
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

fn parse_levels(v: &Value) -> Option<Vec<(f64, f64)>> {
    let arr = v.as_array()?;
    let mut out = Vec::with_capacity(arr.len());
    for level in arr {
        let pair = level.as_array()?;
        let price = as_f64(pair.first()?)?;
        let size = as_f64(pair.get(1)?)?;
        out.push((price, size));
    }
    Some(out)
}

/// `<symbol>@depth10@100ms` frame.
pub fn validate_depth(stream: &str, data: &Value) -> Option<ValidDepth> {
    let symbol = canonical_symbol(stream.split('@').next()?);
    let bids = parse_levels(data.get("b")?)?;
    let asks = parse_levels(data.get("a")?)?;
    Some(ValidDepth { symbol, bids, asks })
}

pub struct ValidMarkPrice {
    pub symbol: String,
    pub mark: f64,
    pub index: f64,
    pub funding_rate: f64,
    pub next_funding_time: i64,
}

/// `<symbol>@markPrice@1s` frame.
pub fn validate_mark_price(data: &Value) -> Option<ValidMarkPrice> {
    let symbol = canonical_symbol(data.get("s")?.as_str()?);
    let mark = as_f64(data.get("p")?)?;
    let index = as_f64(data.get("i")?)?;
    let funding_rate = as_f64(data.get("r")?)?;
    let next_funding_time = data.get("T").and_then(|v| v.as_i64()).unwrap_or(0);
    Some(ValidMarkPrice {
        symbol,
        mark,
        index,
        funding_rate,
        next_funding_time,
    })
}

pub struct ValidForceOrder {
    pub symbol: String,
    pub side_is_sell: bool,
    pub price: f64,
    pub qty: f64,
    pub trade_time: i64,
}

/// `!forceOrder@arr` frame, `data.o` payload.
pub fn validate_force_order(data: &Value) -> Option<ValidForceOrder> {
    let o = data.get("o")?;
    let symbol = canonical_symbol(o.get("s")?.as_str()?);
    let side = o.get("S")?.as_str()?;
    let side_is_sell = match side {
        "SELL" => true,
        "BUY" => false,
        _ => return None,
    };
    let price = as_f64(o.get("p")?)?;
    let qty = as_f64(o.get("q")?)?;
    let trade_time = o.get("T").and_then(|v| v.as_i64()).unwrap_or(0);
    Some(ValidForceOrder {
        symbol,
        side_is_sell,
        price,
        qty,
        trade_time,
    })
}

/// Binance `openInterest` REST response body.
pub fn validate_open_interest(data: &Value) -> Option<f64> {
    as_f64(data.get("openInterest")?)
}

/// Binance `premiumIndex` / `fundingRate` REST response body.
pub fn validate_funding(data: &Value) -> Option<(f64, f64, f64, i64)> {
    let funding_rate = as_f64(data.get("lastFundingRate")?)?;
    let mark = as_f64(data.get("markPrice")?)?;
    let index = as_f64(data.get("indexPrice")?)?;
    let next_funding_time = data.get("nextFundingTime").and_then(|v| v.as_i64()).unwrap_or(0);
    Some((funding_rate, mark, index, next_funding_time))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validates_kline_frame() {
        let data = json!({"k": {"s":"BTCUSDT","t":1,"o":"1","h":"2","l":"0.5","c":"1.5","v":"10","q":"15","x":true}});
        let k = validate_kline("btcusdt@kline_5m", &data).unwrap();
        assert_eq!(k.symbol, "BTCUSDT");
        assert_eq!(k.timeframe, "5m");
        assert!(k.closed);
    }

    #[test]
    fn rejects_bad_force_order_side() {
        let data = json!({"o": {"s":"BTCUSDT","S":"HOLD","p":"1","q":"1"}});
        assert!(validate_force_order(&data).is_none());
    }

    #[test]
    fn rejects_depth_missing_asks() {
        let data = json!({"b": [["1","2"]]});
        assert!(validate_depth("btcusdt@depth10@100ms", &data).is_none());
    }
}
