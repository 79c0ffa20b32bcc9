//! # SQL Generation Prompt Templates

/// The system prompt for the SQL generation stage.
///
/// Placeholders: `{dialect}`, `{no_sql}`
pub const SQL_SYSTEM_PROMPT: &str = "You are a {dialect} expert. Write exactly one read-only SELECT statement that answers the user's question using only the tables and columns listed in the schema. Never modify data or structure. If the schema cannot answer the question, reply with {no_sql} and nothing else. After the statement you may add a final line `CONFIDENCE: <number between 0 and 1>` rating how sure you are.";

/// Rules shared by every generation request.
pub const SQL_CONSTRUCTION_RULES: &str = r#"# Query Construction Rules
1. Use only table and column names from # SCHEMA. Do not invent names or use placeholders.
2. Qualify columns with a table alias whenever more than one table is involved.
3. For "top N" or "highest" requests, ORDER BY the relevant metric DESC and add LIMIT N.
4. Apply every matching definition from # BUSINESS RULES exactly as written.
5. Return raw values. Do not format numbers or dates.
6. Always put a WHERE clause, aggregate or LIMIT on large tables.
7. Do not repeat the question text inside the statement or in comments."#;

/// The user prompt for the SQL generation stage.
///
/// Placeholders: `{rules}`, `{schema}`, `{business_rules}`, `{examples}`,
/// `{history}`, `{feedback}`, `{question}`
pub const SQL_USER_PROMPT: &str = "{rules}\n\n# SCHEMA\n{schema}\n{business_rules}{examples}{history}{feedback}# QUESTION\n{question}\n\nReturn the SQL in a ```sql fenced block.";

/// Section header for business rules. Placeholder: `{items}`
pub const BUSINESS_RULES_SECTION: &str = "# BUSINESS RULES\n{items}\n";

/// Section header for examples. Placeholder: `{items}`
pub const EXAMPLES_SECTION: &str = "# EXAMPLES\n{items}\n";

/// Section header for prior turns. Placeholder: `{items}`
pub const HISTORY_SECTION: &str = "# CONVERSATION SO FAR\n{items}\n";

/// Appended when regenerating after a rejection.
///
/// Placeholders: `{sql}`, `{reason}`
pub const REJECTION_FEEDBACK_SECTION: &str = "# PREVIOUS ATTEMPT REJECTED\nThe statement\n```sql\n{sql}\n```\nwas rejected: {reason}\nWrite a corrected statement.\n\n";
