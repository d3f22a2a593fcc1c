use serde::Serialize;

/// Running state of the in-progress period.
///
/// Unseeded until the first tick ever arrives; after that the three price
/// fields always satisfy `running_low <= last_price <= running_high`.
#[derive(Debug, Clone, Default)]
pub struct PeriodState {
    prices: Option<PeriodPrices>,
    tick_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PeriodPrices {
    last: f64,
    high: f64,
    low: f64,
}

/// Copy of the period state at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeriodSnapshot {
    pub last_price: Option<f64>,
    pub running_high: Option<f64>,
    pub running_low: Option<f64>,
    pub tick_count: u64,
}

/// What a rollover reads out of the period before reseeding it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PeriodClose {
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub tick_count: u64,
}

impl PeriodState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one price into the open period. The first price ever seen seeds
    /// all three fields.
    pub fn apply(&mut self, price: f64) {
        self.prices = Some(match self.prices {
            Some(p) => PeriodPrices {
                last: price,
                high: p.high.max(price),
                low: p.low.min(price),
            },
            None => PeriodPrices {
                last: price,
                high: price,
                low: price,
            },
        });
        self.tick_count += 1;
    }

    /// Read out the period and reseed extrema on the closing price. The last
    /// price keeps following the live feed. Returns `None` while unseeded.
    pub(crate) fn close_and_reseed(&mut self) -> Option<PeriodClose> {
        let p = self.prices.as_mut()?;
        let closed = PeriodClose {
            close: p.last,
            high: p.high,
            low: p.low,
            tick_count: self.tick_count,
        };
        p.high = p.last;
        p.low = p.last;
        self.tick_count = 0;
        Some(closed)
    }

    pub fn is_seeded(&self) -> bool {
        self.prices.is_some()
    }

    pub fn snapshot(&self) -> PeriodSnapshot {
        PeriodSnapshot {
            last_price: self.prices.map(|p| p.last),
            running_high: self.prices.map(|p| p.high),
            running_low: self.prices.map(|p| p.low),
            tick_count: self.tick_count,
        }
    }
}
