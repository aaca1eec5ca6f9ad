use super::*;
use crate::{
    cbor::{encode_value, int_map},
    key_wrap::{unwrap_device_key, DeviceKey, NONCE_LEN, WRAPPED_KEY_LEN},
    status::CTAP2_OK,
    store::{RamSlotStore, StoreOp},
    testing::CounterRng,
};
use ciborium::value::{Integer, Value};

const DEVICE_KEY: [u8; 32] = [0x5A; 32];
const WRAP_KEY: [u8; 32] = [0xC3; 32];
const SESSION_KEY: [u8; 32] = [0x11; 32];

fn uint(value: u64) -> Value {
    Value::Integer(Integer::from(value))
}

fn encode(entries: Vec<(u64, Value)>) -> Vec<u8> {
    encode_value(&int_map(entries)).expect("encode request")
}

fn vendor_request(command_id: u64, auth_ciphertext: Option<Vec<u8>>) -> Vec<u8> {
    let mut params = vec![(1, uint(command_id))];
    if let Some(ciphertext) = auth_ciphertext {
        params.push((2, Value::Bytes(ciphertext)));
    }
    encode(vec![(1, uint(VENDOR_PROTOTYPE)), (2, int_map(params))])
}

fn negotiated_session() -> ChannelSession {
    ChannelSession::with_session_key(SESSION_KEY)
}

/// The platform's half of the channel: seals `wrap_key` for the device.
fn sealed_wrap_key(wrap_key: &[u8], nonce_seed: u8) -> Vec<u8> {
    ChannelSession::with_session_key(SESSION_KEY)
        .seal(wrap_key, &mut CounterRng::new(nonce_seed))
        .expect("seal wrap key")
}

fn plain_store() -> RamSlotStore {
    RamSlotStore::new().with_slot(SlotId::DeviceKey, &DEVICE_KEY)
}

fn run(
    payload: &[u8],
    store: &mut RamSlotStore,
    channel: &mut ChannelSession,
    rng: &mut CounterRng,
) -> Result<Vec<u8>> {
    authenticator_config(payload, store, channel, rng)
}

#[test]
fn enable_wraps_plaintext_key_and_clears_slot() {
    let mut store = plain_store();
    let mut channel = negotiated_session();
    let mut rng = CounterRng::new(0x40);
    let request = vendor_request(ENABLE_KEY_PROTECTION, Some(sealed_wrap_key(&WRAP_KEY, 0)));

    let response = run(&request, &mut store, &mut channel, &mut rng).expect("enable succeeds");
    assert_eq!(response, vec![0xA0]);

    let wrapped = store.slot(SlotId::DeviceKeyEncrypted).to_vec();
    assert_eq!(wrapped.len(), WRAPPED_KEY_LEN);
    assert!(store.slot(SlotId::DeviceKey).is_empty());

    let nonce: Vec<u8> = (0x40..0x40 + NONCE_LEN as u8).collect();
    assert_eq!(&wrapped[..NONCE_LEN], nonce.as_slice());

    let recovered =
        unwrap_device_key(&WrapKey::from_bytes(WRAP_KEY), &wrapped).expect("blob opens");
    assert_eq!(recovered.as_bytes(), &DEVICE_KEY);
}

#[test]
fn enable_writes_new_slot_before_clearing_old_one() {
    let mut store = plain_store();
    let mut channel = negotiated_session();
    let request = vendor_request(ENABLE_KEY_PROTECTION, Some(sealed_wrap_key(&WRAP_KEY, 0)));

    run(&request, &mut store, &mut channel, &mut CounterRng::new(0)).expect("enable succeeds");

    assert_eq!(
        store.journal(),
        &[
            StoreOp::Write {
                slot: SlotId::DeviceKeyEncrypted,
                len: WRAPPED_KEY_LEN
            },
            StoreOp::Write {
                slot: SlotId::DeviceKey,
                len: DEVICE_KEY.len()
            },
            StoreOp::Truncate {
                slot: SlotId::DeviceKey
            },
            StoreOp::Commit,
        ]
    );
}

#[test]
fn enable_without_plaintext_key_is_not_allowed() {
    let wrapped = [0xEE; WRAPPED_KEY_LEN];
    let mut store = RamSlotStore::new().with_slot(SlotId::DeviceKeyEncrypted, &wrapped);
    let mut channel = negotiated_session();
    let request = vendor_request(ENABLE_KEY_PROTECTION, Some(sealed_wrap_key(&WRAP_KEY, 0)));

    for _ in 0..2 {
        assert_eq!(
            run(&request, &mut store, &mut channel, &mut CounterRng::new(0)),
            Err(Ctap2Error::NotAllowed)
        );
    }
    assert!(store.journal().is_empty());
    assert_eq!(store.slot(SlotId::DeviceKeyEncrypted), &wrapped);
}

#[test]
fn enable_requires_negotiated_channel() {
    let mut store = plain_store();
    let mut channel = ChannelSession::new();
    let request = vendor_request(ENABLE_KEY_PROTECTION, Some(sealed_wrap_key(&WRAP_KEY, 0)));

    assert_eq!(
        run(&request, &mut store, &mut channel, &mut CounterRng::new(0)),
        Err(Ctap2Error::NotAllowed)
    );
    assert!(store.journal().is_empty());
    assert_eq!(store.slot(SlotId::DeviceKey), &DEVICE_KEY);
}

#[test]
fn enable_with_undecryptable_ciphertext_is_invalid_parameter() {
    let mut store = plain_store();
    let mut channel = negotiated_session();

    let mut tampered = sealed_wrap_key(&WRAP_KEY, 0);
    tampered[NONCE_LEN] ^= 0x01;
    for ciphertext in [Some(tampered), Some(vec![0; 8]), None] {
        let request = vendor_request(ENABLE_KEY_PROTECTION, ciphertext);
        assert_eq!(
            run(&request, &mut store, &mut channel, &mut CounterRng::new(0)),
            Err(Ctap2Error::InvalidParameter)
        );
    }
    assert!(store.journal().is_empty());
    assert_eq!(store.slot(SlotId::DeviceKey), &DEVICE_KEY);
}

#[test]
fn enable_rejects_wrap_key_of_wrong_length() {
    let mut store = plain_store();
    let mut channel = negotiated_session();
    let request = vendor_request(ENABLE_KEY_PROTECTION, Some(sealed_wrap_key(&[1; 16], 0)));

    assert_eq!(
        run(&request, &mut store, &mut channel, &mut CounterRng::new(0)),
        Err(Ctap2Error::InvalidParameter)
    );
    assert!(store.journal().is_empty());
}

#[test]
fn enable_rejects_plaintext_slot_of_wrong_length() {
    let mut store = RamSlotStore::new().with_slot(SlotId::DeviceKey, &[1; 20]);
    let mut channel = negotiated_session();
    let request = vendor_request(ENABLE_KEY_PROTECTION, Some(sealed_wrap_key(&WRAP_KEY, 0)));

    assert_eq!(
        run(&request, &mut store, &mut channel, &mut CounterRng::new(0)),
        Err(Ctap2Error::InvalidParameter)
    );
    assert_eq!(store.slot(SlotId::DeviceKey), &[1; 20]);
}

#[test]
fn disable_restores_cached_key() {
    let mut store =
        RamSlotStore::new().with_slot(SlotId::DeviceKeyEncrypted, &[0xEE; WRAPPED_KEY_LEN]);
    let mut channel = negotiated_session();
    channel.cache_device_key(DeviceKey::from_bytes(DEVICE_KEY));
    let request = vendor_request(DISABLE_KEY_PROTECTION, None);

    let response =
        run(&request, &mut store, &mut channel, &mut CounterRng::new(0)).expect("disable");
    assert_eq!(response, vec![0xA0]);
    assert_eq!(store.slot(SlotId::DeviceKey), &DEVICE_KEY);
    assert!(store.slot(SlotId::DeviceKeyEncrypted).is_empty());
    assert!(channel.cached_device_key().is_none());
    assert_eq!(
        store.journal(),
        &[
            StoreOp::Write {
                slot: SlotId::DeviceKey,
                len: DEVICE_KEY.len()
            },
            StoreOp::Truncate {
                slot: SlotId::DeviceKeyEncrypted
            },
            StoreOp::Commit,
        ]
    );
}

#[test]
fn disable_without_cached_key_is_pin_auth_invalid() {
    let mut store =
        RamSlotStore::new().with_slot(SlotId::DeviceKeyEncrypted, &[0xEE; WRAPPED_KEY_LEN]);
    let mut channel = negotiated_session();
    let request = vendor_request(DISABLE_KEY_PROTECTION, None);

    assert_eq!(
        run(&request, &mut store, &mut channel, &mut CounterRng::new(0)),
        Err(Ctap2Error::PinAuthInvalid)
    );
    assert!(store.journal().is_empty());
    assert_eq!(
        store.slot(SlotId::DeviceKeyEncrypted),
        &[0xEE; WRAPPED_KEY_LEN]
    );
}

#[test]
fn disable_without_encrypted_key_is_not_allowed() {
    let mut store = plain_store();
    let mut channel = negotiated_session();
    channel.cache_device_key(DeviceKey::from_bytes([7; 32]));
    let request = vendor_request(DISABLE_KEY_PROTECTION, None);

    assert_eq!(
        run(&request, &mut store, &mut channel, &mut CounterRng::new(0)),
        Err(Ctap2Error::NotAllowed)
    );
    assert!(store.journal().is_empty());
    assert!(channel.cached_device_key().is_some());
}

#[test]
fn protection_round_trip_restores_original_key() {
    let mut store = plain_store();
    let mut channel = negotiated_session();
    let mut rng = CounterRng::new(0);

    let enable = vendor_request(ENABLE_KEY_PROTECTION, Some(sealed_wrap_key(&WRAP_KEY, 0x90)));
    run(&enable, &mut store, &mut channel, &mut rng).expect("enable");
    let first_blob = store.slot(SlotId::DeviceKeyEncrypted).to_vec();

    let unlocked = unwrap_device_key(&WrapKey::from_bytes(WRAP_KEY), &first_blob).expect("unlock");
    channel.cache_device_key(unlocked);
    let disable = vendor_request(DISABLE_KEY_PROTECTION, None);
    run(&disable, &mut store, &mut channel, &mut rng).expect("disable");
    assert_eq!(store.slot(SlotId::DeviceKey), &DEVICE_KEY);

    run(&enable, &mut store, &mut channel, &mut rng).expect("enable again");
    let second_blob = store.slot(SlotId::DeviceKeyEncrypted).to_vec();
    assert_ne!(first_blob[..NONCE_LEN], second_blob[..NONCE_LEN]);
    assert_ne!(first_blob, second_blob);
}

#[test]
fn vendor_subcommand_without_params_is_invalid_subcommand() {
    let mut store = plain_store();
    let mut channel = negotiated_session();
    let request = encode(vec![(1, uint(VENDOR_PROTOTYPE))]);
    assert_eq!(request, vec![0xA1, 0x01, 0x18, 0xFF]);

    assert_eq!(
        run(&request, &mut store, &mut channel, &mut CounterRng::new(0)),
        Err(Ctap2Error::InvalidSubcommand)
    );
}

#[test]
fn unknown_vendor_command_is_invalid_subcommand() {
    let mut store = plain_store();
    let mut channel = negotiated_session();
    let request = vendor_request(0x1234, None);
    assert_eq!(
        run(&request, &mut store, &mut channel, &mut CounterRng::new(0)),
        Err(Ctap2Error::InvalidSubcommand)
    );
}

#[test]
fn standard_subcommands_are_unsupported() {
    let mut store = plain_store();
    let mut channel = negotiated_session();
    // Params of a non-vendor subcommand are not walked, so their key order
    // does not matter.
    let params = int_map(vec![(3, uint(1)), (1, uint(2))]);
    for request in [
        encode(vec![(1, uint(0x01))]),
        encode(vec![(1, uint(0x03)), (2, params)]),
    ] {
        assert_eq!(
            run(&request, &mut store, &mut channel, &mut CounterRng::new(0)),
            Err(Ctap2Error::UnsupportedOption)
        );
    }
    assert!(store.journal().is_empty());
}

#[test]
fn duplicate_key_is_rejected_before_touching_slots() {
    let mut store = plain_store();
    let mut channel = negotiated_session();
    let params = int_map(vec![(1, uint(ENABLE_KEY_PROTECTION))]);
    let request = encode(vec![
        (1, uint(VENDOR_PROTOTYPE)),
        (2, params.clone()),
        (2, params),
    ]);

    assert_eq!(
        run(&request, &mut store, &mut channel, &mut CounterRng::new(0)),
        Err(Ctap2Error::InvalidEncoding)
    );
    assert!(store.journal().is_empty());
}

#[test]
fn vendor_params_follow_the_same_ordering_rule() {
    let mut store = plain_store();
    let mut channel = negotiated_session();

    let missing_first = encode(vec![
        (1, uint(VENDOR_PROTOTYPE)),
        (2, int_map(vec![(2, Value::Bytes(vec![1]))])),
    ]);
    assert_eq!(
        run(&missing_first, &mut store, &mut channel, &mut CounterRng::new(0)),
        Err(Ctap2Error::MissingParameter)
    );

    let decreasing = encode(vec![
        (1, uint(VENDOR_PROTOTYPE)),
        (
            2,
            int_map(vec![
                (1, uint(ENABLE_KEY_PROTECTION)),
                (2, Value::Bytes(vec![1])),
                (1, uint(DISABLE_KEY_PROTECTION)),
            ]),
        ),
    ]);
    assert_eq!(
        run(&decreasing, &mut store, &mut channel, &mut CounterRng::new(0)),
        Err(Ctap2Error::InvalidEncoding)
    );

    let wrong_type = encode(vec![
        (1, uint(VENDOR_PROTOTYPE)),
        (2, int_map(vec![(1, Value::Bytes(vec![1]))])),
    ]);
    assert_eq!(
        run(&wrong_type, &mut store, &mut channel, &mut CounterRng::new(0)),
        Err(Ctap2Error::UnexpectedType)
    );
}

#[test]
fn request_without_subcommand_is_missing_parameter() {
    let mut store = plain_store();
    let mut channel = negotiated_session();
    let request = encode(vec![(2, int_map(Vec::new()))]);
    assert_eq!(
        run(&request, &mut store, &mut channel, &mut CounterRng::new(0)),
        Err(Ctap2Error::MissingParameter)
    );
}

#[test]
fn pin_uv_fields_are_decoded_but_not_required() {
    let request = encode(vec![
        (1, uint(VENDOR_PROTOTYPE)),
        (2, int_map(vec![(1, uint(DISABLE_KEY_PROTECTION))])),
        (3, uint(2)),
        (4, Value::Bytes(vec![0xAA; 32])),
    ]);
    let decoded = ConfigRequest::decode(&request).expect("decode");
    assert_eq!(decoded.subcommand, VENDOR_PROTOTYPE);
    assert_eq!(decoded.vendor_command_id, DISABLE_KEY_PROTECTION);
    assert!(decoded.vendor_auth_ciphertext.is_empty());
    assert_eq!(decoded.pin_uv_auth_protocol, Some(2));
    assert_eq!(decoded.pin_uv_auth_param, Some(vec![0xAA; 32]));

    let ignored = encode(vec![
        (1, uint(0x02)),
        (2, int_map(vec![(1, uint(DISABLE_KEY_PROTECTION))])),
    ]);
    let decoded = ConfigRequest::decode(&ignored).expect("decode");
    assert_eq!(decoded.vendor_command_id, 0);
}

#[test]
fn storage_failure_is_processing_error() {
    let mut store = plain_store();
    store.set_fail_writes(true);
    let mut channel = negotiated_session();
    let request = vendor_request(ENABLE_KEY_PROTECTION, Some(sealed_wrap_key(&WRAP_KEY, 0)));
    assert_eq!(
        run(&request, &mut store, &mut channel, &mut CounterRng::new(0)),
        Err(Ctap2Error::Processing)
    );
    assert_eq!(store.slot(SlotId::DeviceKey), &DEVICE_KEY);
}

#[test]
fn disable_clears_cached_key_even_when_write_fails() {
    let mut store =
        RamSlotStore::new().with_slot(SlotId::DeviceKeyEncrypted, &[0xEE; WRAPPED_KEY_LEN]);
    store.set_fail_writes(true);
    let mut channel = negotiated_session();
    channel.cache_device_key(DeviceKey::from_bytes(DEVICE_KEY));
    let request = vendor_request(DISABLE_KEY_PROTECTION, None);

    assert_eq!(
        run(&request, &mut store, &mut channel, &mut CounterRng::new(0)),
        Err(Ctap2Error::Processing)
    );
    assert!(channel.cached_device_key().is_none());
    assert_eq!(
        store.slot(SlotId::DeviceKeyEncrypted),
        &[0xEE; WRAPPED_KEY_LEN]
    );
}

#[test]
fn app_prefixes_status_byte() {
    let mut app = ConfigApp::with_channel(plain_store(), negotiated_session(), CounterRng::new(0));

    let mut request = vec![AUTHENTICATOR_CONFIG];
    request.extend(vendor_request(
        ENABLE_KEY_PROTECTION,
        Some(sealed_wrap_key(&WRAP_KEY, 0)),
    ));
    assert_eq!(app.call(&request), vec![CTAP2_OK, 0xA0]);
    assert_eq!(
        app.store().slot(SlotId::DeviceKeyEncrypted).len(),
        WRAPPED_KEY_LEN
    );

    assert_eq!(app.call(&request), vec![Ctap2Error::NotAllowed.status()]);
    assert_eq!(app.call(&[]), vec![Ctap2Error::InvalidLength.status()]);
    assert_eq!(
        app.call(&[0x04]),
        vec![Ctap2Error::InvalidCommand.status()]
    );
    assert_eq!(
        app.call(&[AUTHENTICATOR_CONFIG, 0xFF]),
        vec![Ctap2Error::InvalidEncoding.status()]
    );
}

#[test]
fn status_codes_match_ctap() {
    assert_eq!(Ctap2Error::InvalidEncoding.status(), 0x12);
    assert_eq!(Ctap2Error::MissingParameter.status(), 0x14);
    assert_eq!(Ctap2Error::UnsupportedOption.status(), 0x2B);
    assert_eq!(Ctap2Error::NotAllowed.status(), 0x30);
    assert_eq!(Ctap2Error::PinAuthInvalid.status(), 0x33);
    assert_eq!(Ctap2Error::InvalidSubcommand.status(), 0x3E);
    assert_eq!(u8::from(Ctap2Error::InvalidParameter), 0x02);
}
