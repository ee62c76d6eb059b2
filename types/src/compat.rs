use crate::{Address, Currency, FungibleAssetValue, Value};
use commonware_codec::Encode;
use std::collections::BTreeSet;

#[test]
fn value_encoding_is_stable() {
    assert_eq!(Value::Null.encode().as_ref(), &[0u8]);
    assert_eq!(Value::Bool(true).encode().as_ref(), &[1u8, 1]);
    assert_eq!(
        Value::from("hi").encode().as_ref(),
        &[4u8, 0, 0, 0, 2, b'h', b'i']
    );

    let mut integer = vec![2u8];
    integer.extend_from_slice(&[0u8; 15]);
    integer.push(42);
    assert_eq!(Value::Integer(42).encode().as_ref(), integer.as_slice());

    let dict = Value::dict([("a", Value::Null)]);
    assert_eq!(
        dict.encode().as_ref(),
        &[6u8, 0, 0, 0, 1, 0, 0, 0, 1, b'a', 0]
    );
}

#[test]
fn currency_encoding_is_stable() {
    let currency = Currency::legacy("NCG", 2, Some(BTreeSet::from([Address::new([0x11; 20])])))
        .expect("valid currency");

    let mut expected = vec![0u8, 0, 0, 3, b'N', b'C', b'G', 2, 1, 0, 0, 0, 1];
    expected.extend_from_slice(&[0x11; 20]);
    expected.extend_from_slice(&[0, 0]);
    assert_eq!(currency.encode().as_ref(), expected.as_slice());
}

#[test]
fn fungible_asset_value_encoding_appends_raw_amount() {
    let currency = Currency::uncapped("GOLD", 0, None).expect("valid currency");
    let value = FungibleAssetValue::from_raw(currency.clone(), -1);

    let mut expected = currency.encode().to_vec();
    expected.extend_from_slice(&[0xff; 16]);
    assert_eq!(value.encode().as_ref(), expected.as_slice());
}
