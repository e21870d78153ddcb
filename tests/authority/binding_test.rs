//! Bindings only verify under the authority that produced them.

use uuid::Uuid;

use actuation_kernel::authority::{ActuationSigner, BindingVerifier, SovereignAuthority};

fn kernel_id(name: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

#[test]
fn binding_indices_are_sequential() {
    let mut authority = SovereignAuthority::from_seed(kernel_id("k"), 1);
    let first = authority.bind_to_action("aa");
    let second = authority.bind_to_action("aa");
    assert_eq!(first.binding_index, 0);
    assert_eq!(second.binding_index, 1);
    assert_ne!(first.binding_nonce, second.binding_nonce);
    assert_ne!(first.binding_signature, second.binding_signature);
    assert_eq!(authority.bindings_issued(), 2);
}

#[test]
fn rebound_hash_does_not_verify() {
    let mut authority = SovereignAuthority::from_seed(kernel_id("k"), 1);
    let mut binding = authority.bind_to_action("aa");
    binding.action_hash = "bb".to_owned();
    assert!(!authority.verify_binding(&binding));
}

#[test]
fn same_seed_other_kernel_rejects() {
    let mut a = SovereignAuthority::from_seed(kernel_id("a"), 9);
    let b = SovereignAuthority::from_seed(kernel_id("b"), 9);
    let binding = a.bind_to_action("aa");
    assert_ne!(a.fingerprint(), b.fingerprint());
    assert!(!b.verify_binding(&binding));
}

#[test]
fn verifier_trait_object_works() {
    let mut authority = SovereignAuthority::from_seed(kernel_id("k"), 3);
    let binding = authority.bind_to_action("cc");
    let verifier: &dyn BindingVerifier = &authority;
    assert!(verifier.verify_binding(&binding));
}
