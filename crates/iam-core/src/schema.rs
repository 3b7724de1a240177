// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

//! Diesel table definitions for the persisted schema described in §6.1.

diesel::table! {
    accesspolicy (id) {
        id -> BigInt,
        parent_id -> BigInt,
        owner_id -> BigInt,
        name -> Text,
        object_type -> Text,
        object_id -> Text,
        is_inherited -> Bool,
        is_extended -> Bool,
        checksum -> BigInt,
    }
}

diesel::table! {
    accesspolicy_rights_roster (policy_id, subject_kind, subject_id) {
        policy_id -> BigInt,
        subject_kind -> SmallInt,
        subject_id -> BigInt,
        rights -> BigInt,
    }
}

diesel::table! {
    group_ (id) {
        id -> BigInt,
        kind -> SmallInt,
        key -> Text,
        name -> Text,
        description -> Text,
        parent_id -> BigInt,
    }
}

diesel::table! {
    group_users (group_id, user_id) {
        group_id -> BigInt,
        user_id -> BigInt,
    }
}

diesel::table! {
    token (hash) {
        hash -> Bytea,
        kind -> SmallInt,
        checkin_total -> Integer,
        checkin_remainder -> Integer,
        created_at -> Timestamptz,
        expire_at -> Timestamptz,
    }
}

diesel::joinable!(accesspolicy_rights_roster -> accesspolicy (policy_id));
diesel::joinable!(group_users -> group_ (group_id));

diesel::allow_tables_to_appear_in_same_query!(accesspolicy, accesspolicy_rights_roster,);
diesel::allow_tables_to_appear_in_same_query!(group_, group_users,);
