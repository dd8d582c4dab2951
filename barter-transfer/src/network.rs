use crate::client::{AssetInfo, NetworkInfo};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Settlement network chosen to carry a transfer.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct NetworkChoice {
    pub network: SmolStr,
    /// Withdrawal fee charged by the source exchange on this network
    pub fee: Decimal,
    pub min: Decimal,
    pub max: Option<Decimal>,
}

impl NetworkChoice {
    fn new(network: &SmolStr, info: &NetworkInfo) -> Self {
        Self {
            network: network.clone(),
            fee: info.withdraw_fee,
            min: info.withdraw_min,
            max: info.withdraw_max,
        }
    }
}

/// Networks present on both sides that can carry `amount`: withdraw-enabled on the `source`,
/// deposit-enabled on the `destination`, and within the source's withdrawal limits.
///
/// Yielded in ascending network name order.
pub fn eligible_networks<'a>(
    source: &'a AssetInfo,
    destination: &'a AssetInfo,
    amount: Decimal,
) -> impl Iterator<Item = NetworkChoice> + 'a {
    source
        .networks
        .iter()
        .filter(move |(_, info)| info.withdraw_enabled && info.accepts(amount))
        .filter(move |(network, _)| {
            destination
                .networks
                .get(*network)
                .is_some_and(|info| info.deposit_enabled)
        })
        .map(|(network, info)| NetworkChoice::new(network, info))
}

/// Select the eligible network with the lowest source withdrawal fee.
///
/// Ties are broken by network name, so identical inputs always yield the identical choice.
pub fn select_network(
    source: &AssetInfo,
    destination: &AssetInfo,
    amount: Decimal,
) -> Option<NetworkChoice> {
    eligible_networks(source, destination, amount).min_by(|a, b| {
        a.fee
            .cmp(&b.fee)
            .then_with(|| a.network.cmp(&b.network))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn info(networks: &[(&str, bool, bool, Decimal, Option<Decimal>, Decimal)]) -> AssetInfo {
        AssetInfo {
            asset: SmolStr::new("USDT"),
            networks: networks
                .iter()
                .map(|(name, withdraw, deposit, min, max, fee)| {
                    (
                        SmolStr::new(name),
                        NetworkInfo {
                            withdraw_enabled: *withdraw,
                            deposit_enabled: *deposit,
                            withdraw_min: *min,
                            withdraw_max: *max,
                            withdraw_fee: *fee,
                        },
                    )
                })
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_select_network_lowest_fee() {
        let source = info(&[
            ("ERC20", true, true, dec!(1), None, dec!(0.5)),
            ("TRC20", true, true, dec!(1), None, dec!(0.1)),
        ]);
        let destination = info(&[
            ("ERC20", true, true, dec!(1), None, dec!(5)),
            ("TRC20", true, true, dec!(1), None, dec!(5)),
        ]);

        let choice = select_network(&source, &destination, dec!(100)).unwrap();
        assert_eq!(choice.network, "TRC20");
        assert_eq!(choice.fee, dec!(0.1));
    }

    #[test]
    fn test_select_network_is_deterministic_on_ties() {
        let source = info(&[
            ("SOL", true, true, dec!(1), None, dec!(0.2)),
            ("BEP20", true, true, dec!(1), None, dec!(0.2)),
            ("ERC20", true, true, dec!(1), None, dec!(3)),
        ]);
        let destination = source.clone();

        let first = select_network(&source, &destination, dec!(10));
        for _ in 0..10 {
            assert_eq!(select_network(&source, &destination, dec!(10)), first);
        }
        assert_eq!(first.unwrap().network, "BEP20");
    }

    #[test]
    fn test_eligible_networks_filters() {
        struct TestCase {
            amount: Decimal,
            expected: Vec<&'static str>,
        }

        let source = info(&[
            ("ARB", true, true, dec!(1), Some(dec!(50)), dec!(0.3)),
            // Withdrawals suspended at the source
            ("ERC20", false, true, dec!(1), None, dec!(3)),
            ("SOL", true, true, dec!(20), None, dec!(0.2)),
            // Missing from the destination
            ("TON", true, true, dec!(1), None, dec!(0.1)),
            ("TRC20", true, true, dec!(1), None, dec!(1)),
        ]);
        let destination = info(&[
            ("ARB", true, true, dec!(1), None, dec!(0)),
            ("ERC20", true, true, dec!(1), None, dec!(0)),
            ("SOL", true, true, dec!(1), None, dec!(0)),
            // Deposits suspended at the destination
            ("TRC20", true, false, dec!(1), None, dec!(0)),
        ]);

        let cases = vec![
            TestCase { amount: dec!(10), expected: vec!["ARB"] },
            TestCase { amount: dec!(30), expected: vec!["ARB", "SOL"] },
            TestCase { amount: dec!(60), expected: vec!["SOL"] },
            TestCase { amount: dec!(0.5), expected: vec![] },
        ];

        for (index, test) in cases.into_iter().enumerate() {
            let actual = eligible_networks(&source, &destination, test.amount)
                .map(|choice| choice.network)
                .collect::<Vec<_>>();
            assert_eq!(actual, test.expected, "TC{index} failed");
        }
    }
}
