// SQL fragments shared by the header statements. Each header statement aliases
// its deal table `d`; fragments expand to literals for use inside `concat!`.

/// Company, legal entity, contract, portfolio, broker and audit columns.
/// Ends with a comma.
macro_rules! common_columns {
    () => {
        "
            d.trade_date AS transaction_date,
            d.cy_company_key::bigint AS company_key,
            c.short_name AS company,
            c.long_name AS company_long_name,
            COALESCE(c.company_code, c.short_name) AS company_code,
            l.short_name AS legal_entity,
            l.long_name AS legal_entity_long_name,
            d.lgl_cy_entity_key::bigint AS legal_entity_key,
            cn.contract_number AS contract,
            d.cf_confirm_format AS confirm_format,
            d.hs_hedge_key AS hedge_key,
            d.prt_portfolio::bigint AS portfolio_id,
            p.description AS portfolio,
            d.ur_trader AS trader,
            fbf.cy_broker_key::bigint AS broker_key,
            COALESCE(bc.short_name, 'NA') AS broker,
            d.create_user AS created_by,
            d.create_date AS created_at,
            d.modify_user AS modified_by,
            d.modify_date AS modified_at,
        "
    };
}

/// Joins backing `common_columns!` for a deal table keyed by `$key`.
macro_rules! common_joins {
    ($key:literal, $deal_type:literal) => {
        concat!(
            "
            INNER JOIN ledger.companies c ON c.company_key = d.cy_company_key
            INNER JOIN ledger.companies l ON l.company_key = d.lgl_cy_entity_key
            INNER JOIN ledger.portfolios p ON p.portfolio = d.prt_portfolio
            LEFT JOIN ledger.contracts cn ON cn.contract_key = d.kk_contract_key
            LEFT JOIN ledger.flat_broker_fees fbf
                ON fbf.deal_key = d.",
            $key,
            " AND fbf.dlt_deal_type = ",
            $deal_type,
            "
            LEFT JOIN ledger.companies bc ON bc.company_key = fbf.cy_broker_key
            "
        )
    };
}

/// Execution date, execution time and exotic flag attribute columns.
/// Carries no trailing comma, so it closes the select list.
macro_rules! execution_columns {
    () => {
        "
            df.field_value AS execution_date,
            tf.field_value AS execution_time,
            ef.field_value AS exotic_flag
        "
    };
}

macro_rules! execution_attributes {
    ($key:literal, $deal_type:literal) => {
        concat!(
            "
            LEFT JOIN ledger.deal_attributes df
                ON df.deal_key = d.",
            $key,
            " AND df.dlt_deal_type = ",
            $deal_type,
            " AND df.field_name = 'EXECUTION_DATE'
            LEFT JOIN ledger.deal_attributes tf
                ON tf.deal_key = d.",
            $key,
            " AND tf.dlt_deal_type = ",
            $deal_type,
            " AND tf.field_name = 'EXECUTION_TIMESTAMP'
            LEFT JOIN ledger.deal_attributes ef
                ON ef.deal_key = d.",
            $key,
            " AND ef.dlt_deal_type = ",
            $deal_type,
            " AND ef.field_name = 'EXOTIC_TRADE_FLAG'
            "
        )
    };
}
