// Diesel table definitions. Kept in sync with `repository::diesel_store::SCHEMA_SQL`.

diesel::table! {
    products (id) {
        id -> Text,
        platform -> Text,
        name -> Text,
        description -> Nullable<Text>,
        image -> Nullable<Text>,
        category -> Nullable<Text>,
        brand -> Nullable<Text>,
        model -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    prices (seq) {
        seq -> Integer,
        id -> Text,
        product_id -> Text,
        price -> Double,
        original_price -> Nullable<Double>,
        currency -> Text,
        platform -> Text,
        url -> Text,
        in_stock -> Bool,
        created_at -> Text,
    }
}

diesel::table! {
    price_alerts (id) {
        id -> Text,
        user_id -> Text,
        product_id -> Text,
        target_price -> Double,
        status -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    notifications (id) {
        id -> Text,
        user_id -> Text,
        kind -> Text,
        title -> Text,
        body -> Text,
        metadata -> Text,
        read -> Bool,
        created_at -> Text,
    }
}

diesel::table! {
    sessions (id) {
        id -> Text,
        user_id -> Text,
        expires_at -> Text,
    }
}

diesel::table! {
    searches (id) {
        id -> Integer,
        query -> Text,
        user_id -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    scheduled_tasks (product_id) {
        product_id -> Text,
        interval_minutes -> Integer,
        created_at -> Text,
    }
}

diesel::joinable!(prices -> products (product_id));
diesel::joinable!(price_alerts -> products (product_id));

diesel::allow_tables_to_appear_in_same_query!(
    products,
    prices,
    price_alerts,
    notifications,
    sessions,
    searches,
    scheduled_tasks,
);
