use common::{Direction, OrderEvent, OrderSide, SignalEvent, SizingConfig};

/// Turns a signal into at most one order given the current position.
///
/// Entries only happen from flat; EXIT flattens whatever is held.
pub trait PositionSizer {
    fn size_order(&self, signal: &SignalEvent, current: i64) -> Option<OrderEvent>;
}

/// Build the sizer selected by configuration
pub fn sizer_from_config(config: &SizingConfig) -> Box<dyn PositionSizer> {
    match *config {
        SizingConfig::Naive { quantity } => Box::new(NaiveSizer::new(quantity)),
        SizingConfig::StrengthScaled { base_quantity } => {
            Box::new(StrengthScaledSizer::new(base_quantity))
        }
    }
}

/// Order that closes `current` entirely
fn flatten(symbol: &str, current: i64) -> Option<OrderEvent> {
    match current {
        0 => None,
        q if q > 0 => Some(OrderEvent::market(symbol, q.unsigned_abs(), OrderSide::Sell)),
        q => Some(OrderEvent::market(symbol, q.unsigned_abs(), OrderSide::Buy)),
    }
}

/// Entry order of `quantity` units, only when flat
fn enter(signal: &SignalEvent, current: i64, quantity: u64) -> Option<OrderEvent> {
    if current != 0 || quantity == 0 {
        return None;
    }
    let side = match signal.direction {
        Direction::Long => OrderSide::Buy,
        Direction::Short => OrderSide::Sell,
        Direction::Exit => return None,
    };
    Some(OrderEvent::market(&signal.symbol, quantity, side))
}

/// Fixed quantity per entry regardless of signal strength
#[derive(Debug, Clone, Copy)]
pub struct NaiveSizer {
    quantity: u64,
}

impl NaiveSizer {
    pub fn new(quantity: u64) -> Self {
        Self { quantity }
    }
}

impl Default for NaiveSizer {
    fn default() -> Self {
        Self::new(100)
    }
}

impl PositionSizer for NaiveSizer {
    fn size_order(&self, signal: &SignalEvent, current: i64) -> Option<OrderEvent> {
        match signal.direction {
            Direction::Exit => flatten(&signal.symbol, current),
            _ => enter(signal, current, self.quantity),
        }
    }
}

/// Entry quantity of `round(base × |strength|)`, so hedge ratios carried in
/// the signal strength size each leg
#[derive(Debug, Clone, Copy)]
pub struct StrengthScaledSizer {
    base_quantity: u64,
}

impl StrengthScaledSizer {
    pub fn new(base_quantity: u64) -> Self {
        Self { base_quantity }
    }
}

impl PositionSizer for StrengthScaledSizer {
    fn size_order(&self, signal: &SignalEvent, current: i64) -> Option<OrderEvent> {
        match signal.direction {
            Direction::Exit => flatten(&signal.symbol, current),
            _ => {
                let scaled = (self.base_quantity as f64 * signal.strength.abs()).round();
                let quantity = if scaled.is_finite() && scaled > 0.0 {
                    scaled as u64
                } else {
                    0
                };
                enter(signal, current, quantity)
            }
        }
    }
}
