use proptest::prelude::*;
use std::collections::HashSet;
use storefront::catalog::{Product, ProductId};
use storefront::{CartState, CartStore, Money};

fn product(index: usize, cents: i64) -> Product {
    Product::new(
        ProductId::new(format!("p{index}")).unwrap(),
        format!("Product {index}"),
        Money::from_minor(cents).unwrap(),
    )
}

#[derive(Debug, Clone)]
enum Op {
    Add(usize),
    Remove(usize),
    SetQuantity(usize, i64),
    Clear,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..6).prop_map(Op::Add),
        1 => (0usize..6).prop_map(Op::Remove),
        2 => (0usize..6, -3i64..6).prop_map(|(i, q)| Op::SetQuantity(i, q)),
        1 => Just(Op::Clear),
    ]
}

fn catalog(prices: &[i64]) -> Vec<Product> {
    prices
        .iter()
        .enumerate()
        .map(|(i, cents)| product(i, *cents))
        .collect()
}

proptest! {
    #[test]
    fn adds_count_calls_and_keep_one_line_per_id(
        prices in prop::collection::vec(1i64..1_000_000, 6),
        picks in prop::collection::vec(0usize..6, 0..60),
    ) {
        let products = catalog(&prices);
        let mut cart = CartStore::new();
        for &pick in &picks {
            cart.add_item(products[pick].clone());
        }

        prop_assert_eq!(cart.item_count(), picks.len() as u64);
        let distinct: HashSet<usize> = picks.iter().copied().collect();
        prop_assert_eq!(cart.items().len(), distinct.len());

        // first-added order
        let mut seen = HashSet::new();
        let expected: Vec<String> = picks
            .iter()
            .filter(|pick| seen.insert(**pick))
            .map(|pick| format!("p{pick}"))
            .collect();
        let actual: Vec<String> = cart.items().iter().map(|l| l.product_id().to_string()).collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn derived_values_match_lines_after_any_ops(
        prices in prop::collection::vec(0i64..1_000_000, 6),
        ops in prop::collection::vec(op(), 0..80),
    ) {
        let products = catalog(&prices);
        let mut cart = CartStore::new();
        for op in ops {
            match op {
                Op::Add(i) => cart.add_item(products[i].clone()),
                Op::Remove(i) => cart.remove_item(&products[i].id),
                Op::SetQuantity(i, q) => cart.set_quantity(&products[i].id, q),
                Op::Clear => cart.clear(),
            }

            let lines = cart.items();
            let ids: HashSet<_> = lines.iter().map(|l| l.product_id().clone()).collect();
            prop_assert_eq!(ids.len(), lines.len());
            prop_assert!(lines.iter().all(|l| l.quantity >= 1));

            let count: u64 = lines.iter().map(|l| u64::from(l.quantity)).sum();
            prop_assert_eq!(cart.item_count(), count);

            let cents: i64 = lines
                .iter()
                .map(|l| prices[l.product_id().as_str()[1..].parse::<usize>().unwrap()] * i64::from(l.quantity))
                .sum();
            prop_assert_eq!(cart.cart_total(), Money::from_minor(cents).unwrap());

            let expected_state = if lines.is_empty() { CartState::Empty } else { CartState::NonEmpty };
            prop_assert_eq!(cart.state(), expected_state);
        }
    }

    #[test]
    fn removing_unknown_id_is_a_no_op(
        picks in prop::collection::vec(0usize..3, 1..20),
    ) {
        let products = catalog(&[1010, 2020, 3030]);
        let mut cart = CartStore::new();
        for &pick in &picks {
            cart.add_item(products[pick].clone());
        }
        let before = cart.items();
        let total = cart.cart_total();

        cart.remove_item(&ProductId::new("not-in-cart").unwrap());
        cart.set_quantity(&ProductId::new("not-in-cart").unwrap(), 4);

        prop_assert_eq!(cart.items(), before);
        prop_assert_eq!(cart.cart_total(), total);
    }

    #[test]
    fn clear_always_empties(
        picks in prop::collection::vec(0usize..3, 0..20),
    ) {
        let products = catalog(&[1999, 5, 120000]);
        let mut cart = CartStore::new();
        for &pick in &picks {
            cart.add_item(products[pick].clone());
        }
        cart.clear();
        prop_assert!(cart.items().is_empty());
        prop_assert_eq!(cart.item_count(), 0);
        prop_assert_eq!(cart.cart_total(), Money::ZERO);
    }
}
