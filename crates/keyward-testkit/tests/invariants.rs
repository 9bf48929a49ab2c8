//! Random membership sequences never break the registry's invariants.

use proptest::prelude::*;

use keyward::{NewMember, ResourceKind, Role};
use keyward_store::Store;
use keyward_testkit::generators::membership_op;
use keyward_testkit::{engine_with_memory_store, MembershipOp, TestUser};

fn run(ops: Vec<MembershipOp>) -> Result<(), TestCaseError> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    rt.block_on(async {
        let engine = engine_with_memory_store();
        let creator = TestUser::new();
        creator.enroll(&engine).await;
        let rid = engine
            .lifecycle()
            .create_resource(&creator.id, ResourceKind::GroupRoom, &[])
            .await
            .unwrap()
            .resource
            .id;
        let wrapped = engine
            .registry()
            .get_wrapped_key(&creator.id, &rid)
            .await
            .unwrap();
        let key = creator.unwrap(&wrapped);
        let mut users = vec![creator];

        for op in ops {
            let members = engine.store().list_members(&rid).await.unwrap();
            if members.is_empty() {
                break;
            }
            let pick = |i: usize| members[i % members.len()].user_id;

            // Rejected operations are expected; only the invariants matter.
            match op {
                MembershipOp::Add { actor, role } => {
                    let newcomer = TestUser::new();
                    let member =
                        NewMember::viewer(newcomer.id, newcomer.wrap_for(&key)).with_role(role);
                    let _ = engine
                        .registry()
                        .add_members(&pick(actor), &rid, vec![member])
                        .await;
                    users.push(newcomer);
                }
                MembershipOp::Remove { actor, target } => {
                    let _ = engine
                        .registry()
                        .remove_members(&pick(actor), &rid, &[pick(target)])
                        .await;
                }
                MembershipOp::ChangeRole {
                    actor,
                    target,
                    role,
                } => {
                    let _ = engine
                        .registry()
                        .update_role(&pick(actor), &rid, &pick(target), role)
                        .await;
                }
                MembershipOp::Leave { actor } => {
                    let _ = engine.registry().leave(&pick(actor), &rid).await;
                }
            }

            let members = engine.store().list_members(&rid).await.unwrap();
            if members.is_empty() {
                prop_assert!(engine.store().get_resource(&rid).await.unwrap().is_none());
                continue;
            }
            prop_assert!(members.iter().any(|m| m.role == Role::Owner));
            for member in &members {
                let user = users.iter().find(|u| u.id == member.user_id).unwrap();
                let unwrapped = user.unwrap(&member.wrapped_key);
                prop_assert_eq!(unwrapped.as_bytes(), key.as_bytes());
            }
        }
        Ok(())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn membership_sequences_keep_an_owner_and_one_key(
        ops in prop::collection::vec(membership_op(), 1..24)
    ) {
        run(ops)?;
    }
}
