use crate::models::OrderStatus;

/// Valid targets from each status. Any pair not listed is rejected; delivered
/// and cancelled are terminal.
pub fn allowed_targets(from: OrderStatus) -> &'static [OrderStatus] {
    use OrderStatus::*;
    match from {
        Draft => &[Paid, Cancelled],
        Paid => &[Preparing, Cancelled],
        Preparing => &[Shipped, Cancelled],
        Shipped => &[Delivered],
        Delivered | Cancelled => &[],
    }
}

pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
    allowed_targets(from).contains(&to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    const ALL: [OrderStatus; 6] = [Draft, Paid, Preparing, Shipped, Delivered, Cancelled];

    #[test]
    fn every_pair_is_decided() {
        for from in ALL {
            for to in ALL {
                let expected = matches!(
                    (from, to),
                    (Draft, Paid)
                        | (Draft, Cancelled)
                        | (Paid, Preparing)
                        | (Paid, Cancelled)
                        | (Preparing, Shipped)
                        | (Preparing, Cancelled)
                        | (Shipped, Delivered)
                );
                assert_eq!(
                    can_transition(from, to),
                    expected,
                    "{from:?} -> {to:?}"
                );
            }
        }
    }

    #[test]
    fn terminal_statuses_have_no_exits() {
        assert!(allowed_targets(Delivered).is_empty());
        assert!(allowed_targets(Cancelled).is_empty());
    }
}
