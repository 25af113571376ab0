//! # Dump fixtures
//!
//! Canned `mysqldump` output shaped like the real thing: a header, one
//! structure and data section per table and the closing session resets.

/// One table of a [`DumpFixture`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFixture {
    pub name: String,
    /// Column definitions inside `CREATE TABLE (...)`.
    pub columns: Vec<String>,
    /// Value tuples such as `(1,'a')`, written in one extended insert.
    pub rows: Vec<String>,
}

impl TableFixture {
    /// Create a table with the given column definitions
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Add a value tuple
    pub fn with_row(mut self, row: impl Into<String>) -> Self {
        self.rows.push(row.into());
        self
    }

    fn render(&self, out: &mut String) {
        let name = &self.name;
        out.push_str(&format!(
            "\n--\n-- Table structure for table `{name}`\n--\n\n\
             DROP TABLE IF EXISTS `{name}`;\n\
             /*!40101 SET @saved_cs_client     = @@character_set_client */;\n\
             /*!50503 SET character_set_client = utf8mb4 */;\n\
             CREATE TABLE `{name}` (\n"
        ));
        let columns: Vec<String> = self.columns.iter().map(|c| format!("  {c}")).collect();
        out.push_str(&columns.join(",\n"));
        out.push_str(
            "\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;\n\
             /*!40101 SET character_set_client = @saved_cs_client */;\n",
        );
        out.push_str(&format!(
            "\n--\n-- Dumping data for table `{name}`\n--\n\n\
             LOCK TABLES `{name}` WRITE;\n\
             /*!40000 ALTER TABLE `{name}` DISABLE KEYS */;\n"
        ));
        if !self.rows.is_empty() {
            out.push_str(&format!("INSERT INTO `{name}` VALUES {};\n", self.rows.join(",")));
        }
        out.push_str(&format!(
            "/*!40000 ALTER TABLE `{name}` ENABLE KEYS */;\nUNLOCK TABLES;\n"
        ));
    }
}

/// A whole-database dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpFixture {
    pub database: String,
    pub tables: Vec<TableFixture>,
}

impl DumpFixture {
    /// Create an empty dump of `database`
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            tables: Vec::new(),
        }
    }

    /// Add a table section
    pub fn with_table(mut self, table: TableFixture) -> Self {
        self.tables.push(table);
        self
    }

    /// `shopdb` with `orders`, `customers` and `products`, in that order.
    pub fn shop() -> Self {
        Self::new("shopdb")
            .with_table(
                TableFixture::new(
                    "orders",
                    [
                        "`id` int NOT NULL AUTO_INCREMENT",
                        "`customer_id` int NOT NULL",
                        "`total` decimal(10,2) NOT NULL",
                        "`updated_at` timestamp NOT NULL DEFAULT CURRENT_TIMESTAMP",
                        "PRIMARY KEY (`id`)",
                    ],
                )
                .with_row("(1,10,'19.99','2024-05-01 08:00:00')")
                .with_row("(2,11,'5.00','2024-05-01 09:30:00')"),
            )
            .with_table(
                TableFixture::new(
                    "customers",
                    [
                        "`id` int NOT NULL AUTO_INCREMENT",
                        "`name` varchar(64) NOT NULL",
                        "PRIMARY KEY (`id`)",
                    ],
                )
                .with_row("(10,'Ada')")
                .with_row("(11,'Grace')"),
            )
            .with_table(
                TableFixture::new(
                    "products",
                    [
                        "`id` int NOT NULL AUTO_INCREMENT",
                        "`sku` varchar(32) NOT NULL",
                        "PRIMARY KEY (`id`)",
                    ],
                )
                .with_row("(100,'SKU-100')"),
            )
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Render the dump. A non-empty `only` restricts it to those tables, as
    /// `mysqldump db t1 t2` would.
    pub fn render(&self, only: &[String]) -> String {
        let mut out = format!(
            "-- MySQL dump 10.13  Distrib 8.0.36, for Linux (x86_64)\n\
             --\n\
             -- Host: localhost    Database: {}\n\
             -- ------------------------------------------------------\n\
             -- Server version\t8.0.36\n\n\
             /*!40101 SET @OLD_CHARACTER_SET_CLIENT=@@CHARACTER_SET_CLIENT */;\n\
             /*!50503 SET NAMES utf8mb4 */;\n\
             /*!40103 SET @OLD_TIME_ZONE=@@TIME_ZONE */;\n\
             /*!40103 SET TIME_ZONE='+00:00' */;\n\
             /*!40014 SET @OLD_FOREIGN_KEY_CHECKS=@@FOREIGN_KEY_CHECKS, FOREIGN_KEY_CHECKS=0 */;\n",
            self.database
        );
        for table in &self.tables {
            if only.is_empty() || only.iter().any(|name| name == &table.name) {
                table.render(&mut out);
            }
        }
        out.push_str(
            "\n/*!40103 SET TIME_ZONE=@OLD_TIME_ZONE */;\n\
             /*!40014 SET FOREIGN_KEY_CHECKS=@OLD_FOREIGN_KEY_CHECKS */;\n\
             /*!40101 SET CHARACTER_SET_CLIENT=@OLD_CHARACTER_SET_CLIENT */;\n\n\
             -- Dump completed on 2024-05-01 12:00:00\n",
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restricted_render_keeps_only_named_tables() {
        let dump = DumpFixture::shop().render(&["customers".to_string()]);
        assert!(dump.contains("CREATE TABLE `customers`"));
        assert!(dump.contains("INSERT INTO `customers` VALUES (10,'Ada'),(11,'Grace');"));
        assert!(!dump.contains("`orders`"));
        assert!(!dump.contains("`products`"));
    }
}
