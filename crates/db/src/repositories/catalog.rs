use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, Row};
use tracing::info;

use comanda_core::domain::catalog::{
    require_text, validate_price, City, CityId, ComplaintType, ComplaintTypeId, Country,
    CountryId, Customer, CustomerId, Employee, EmployeeId, JobTitle, JobTitleId, NewCustomer,
    NewEmployee, NewJobTitle, NewProduct, NewRestaurant, Product, ProductId, Province,
    ProvinceId, ResolutionType, ResolutionTypeId, Restaurant, RestaurantId,
};
use comanda_core::errors::DomainError;

use super::{
    constraint_error, missing, parse_decimal, parse_u32, ReferenceCatalog, RepositoryError,
};
use crate::DbPool;

pub struct SqlReferenceCatalog {
    pool: DbPool,
}

impl SqlReferenceCatalog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn is_referenced(&self, sql: &str, id: i64) -> Result<bool, RepositoryError> {
        let referenced: i64 = sqlx::query_scalar(sql).bind(id).fetch_one(&self.pool).await?;
        Ok(referenced == 1)
    }

    async fn delete_row(
        &self,
        sql: &str,
        entity: &'static str,
        id: i64,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(sql)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(constraint_error(entity))?;

        if result.rows_affected() == 0 {
            return Err(missing(entity, id));
        }
        Ok(())
    }
}

#[async_trait]
impl ReferenceCatalog for SqlReferenceCatalog {
    async fn create_country(&self, name: String) -> Result<Country, RepositoryError> {
        require_text("country name", &name)?;

        let id = sqlx::query("INSERT INTO country (name) VALUES (?)")
            .bind(&name)
            .execute(&self.pool)
            .await
            .map_err(constraint_error("country"))?
            .last_insert_rowid();

        Ok(Country { id: CountryId(id), name })
    }

    async fn create_province(
        &self,
        country_id: CountryId,
        name: String,
    ) -> Result<Province, RepositoryError> {
        require_text("province name", &name)?;

        let id = sqlx::query("INSERT INTO province (country_id, name) VALUES (?, ?)")
            .bind(country_id.0)
            .bind(&name)
            .execute(&self.pool)
            .await
            .map_err(constraint_error("province"))?
            .last_insert_rowid();

        Ok(Province { id: ProvinceId(id), country_id, name })
    }

    async fn create_city(
        &self,
        province_id: ProvinceId,
        name: String,
    ) -> Result<City, RepositoryError> {
        require_text("city name", &name)?;

        let id = sqlx::query("INSERT INTO city (province_id, name) VALUES (?, ?)")
            .bind(province_id.0)
            .bind(&name)
            .execute(&self.pool)
            .await
            .map_err(constraint_error("city"))?
            .last_insert_rowid();

        Ok(City { id: CityId(id), province_id, name })
    }

    async fn create_restaurant(
        &self,
        restaurant: NewRestaurant,
    ) -> Result<Restaurant, RepositoryError> {
        require_text("restaurant name", &restaurant.name)?;
        require_text("restaurant tax id", &restaurant.tax_id)?;
        require_text("restaurant street address", &restaurant.street_address)?;

        let id = sqlx::query(
            "INSERT INTO restaurant (name, tax_id, branch_number, city_id, street_address)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&restaurant.name)
        .bind(&restaurant.tax_id)
        .bind(i64::from(restaurant.branch_number))
        .bind(restaurant.city_id.0)
        .bind(&restaurant.street_address)
        .execute(&self.pool)
        .await
        .map_err(constraint_error("restaurant"))?
        .last_insert_rowid();

        Ok(Restaurant {
            id: RestaurantId(id),
            name: restaurant.name,
            tax_id: restaurant.tax_id,
            branch_number: restaurant.branch_number,
            city_id: restaurant.city_id,
            street_address: restaurant.street_address,
        })
    }

    async fn create_job_title(&self, job_title: NewJobTitle) -> Result<JobTitle, RepositoryError> {
        require_text("job title name", &job_title.name)?;
        validate_price(job_title.salary)?;

        let id = sqlx::query("INSERT INTO job_title (name, salary, description) VALUES (?, ?, ?)")
            .bind(&job_title.name)
            .bind(job_title.salary.to_string())
            .bind(job_title.description.as_deref())
            .execute(&self.pool)
            .await
            .map_err(constraint_error("job title"))?
            .last_insert_rowid();

        Ok(JobTitle {
            id: JobTitleId(id),
            name: job_title.name,
            salary: job_title.salary,
            description: job_title.description,
        })
    }

    async fn create_employee(&self, employee: NewEmployee) -> Result<Employee, RepositoryError> {
        require_text("employee first name", &employee.first_name)?;

        let id = sqlx::query(
            "INSERT INTO employee (
                job_title_id, national_id, first_name, last_name, age,
                home_address, landline, mobile
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(employee.job_title_id.0)
        .bind(employee.national_id.as_deref())
        .bind(&employee.first_name)
        .bind(employee.last_name.as_deref())
        .bind(employee.age.map(i64::from))
        .bind(employee.home_address.as_deref())
        .bind(employee.landline.as_deref())
        .bind(employee.mobile.as_deref())
        .execute(&self.pool)
        .await
        .map_err(constraint_error("employee"))?
        .last_insert_rowid();

        info!(event_name = "catalog.employee.created", employee_id = id, "employee registered");

        Ok(Employee {
            id: EmployeeId(id),
            job_title_id: employee.job_title_id,
            national_id: employee.national_id,
            first_name: employee.first_name,
            last_name: employee.last_name,
            age: employee.age,
            home_address: employee.home_address,
            landline: employee.landline,
            mobile: employee.mobile,
        })
    }

    async fn create_customer(&self, customer: NewCustomer) -> Result<Customer, RepositoryError> {
        require_text("customer name", &customer.name)?;
        require_text("customer email", &customer.email)?;
        if !customer.email.contains('@') {
            return Err(DomainError::Validation(format!(
                "customer email `{}` is not an email address",
                customer.email
            ))
            .into());
        }

        let id = sqlx::query("INSERT INTO customer (name, email, phone) VALUES (?, ?, ?)")
            .bind(&customer.name)
            .bind(&customer.email)
            .bind(&customer.phone)
            .execute(&self.pool)
            .await
            .map_err(constraint_error("customer"))?
            .last_insert_rowid();

        info!(event_name = "catalog.customer.created", customer_id = id, "customer registered");

        Ok(Customer {
            id: CustomerId(id),
            name: customer.name,
            email: customer.email,
            phone: customer.phone,
        })
    }

    async fn create_product(&self, product: NewProduct) -> Result<Product, RepositoryError> {
        require_text("product name", &product.name)?;
        validate_price(product.price)?;

        let id = sqlx::query("INSERT INTO product (name, price, description) VALUES (?, ?, ?)")
            .bind(&product.name)
            .bind(product.price.to_string())
            .bind(product.description.as_deref())
            .execute(&self.pool)
            .await
            .map_err(constraint_error("product"))?
            .last_insert_rowid();

        info!(
            event_name = "catalog.product.created",
            product_id = id,
            price = %product.price,
            "product registered"
        );

        Ok(Product {
            id: ProductId(id),
            name: product.name,
            price: product.price,
            description: product.description,
        })
    }

    async fn create_complaint_type(
        &self,
        name: String,
        description: String,
    ) -> Result<ComplaintType, RepositoryError> {
        require_text("complaint type name", &name)?;

        let id = sqlx::query("INSERT INTO complaint_type (name, description) VALUES (?, ?)")
            .bind(&name)
            .bind(&description)
            .execute(&self.pool)
            .await
            .map_err(constraint_error("complaint type"))?
            .last_insert_rowid();

        Ok(ComplaintType { id: ComplaintTypeId(id), name, description })
    }

    async fn create_resolution_type(
        &self,
        name: String,
        description: String,
    ) -> Result<ResolutionType, RepositoryError> {
        require_text("resolution type name", &name)?;

        let id = sqlx::query("INSERT INTO resolution_type (name, description) VALUES (?, ?)")
            .bind(&name)
            .bind(&description)
            .execute(&self.pool)
            .await
            .map_err(constraint_error("resolution type"))?
            .last_insert_rowid();

        Ok(ResolutionType { id: ResolutionTypeId(id), name, description })
    }

    async fn find_product(&self, id: ProductId) -> Result<Option<Product>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, price, description FROM product WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(product_from_row).transpose()
    }

    /// Changes the catalog price only. Line items keep the price they were
    /// created with.
    async fn update_product_price(
        &self,
        id: ProductId,
        price: Decimal,
    ) -> Result<Product, RepositoryError> {
        validate_price(price)?;

        let result = sqlx::query("UPDATE product SET price = ? WHERE id = ?")
            .bind(price.to_string())
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(missing("product", id.0));
        }

        info!(
            event_name = "catalog.product.price_updated",
            product_id = id.0,
            price = %price,
            "product price updated"
        );

        self.find_product(id).await?.ok_or_else(|| missing("product", id.0))
    }

    async fn find_customer(&self, id: CustomerId) -> Result<Option<Customer>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, email, phone FROM customer WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(customer_from_row).transpose()
    }

    async fn find_employee(&self, id: EmployeeId) -> Result<Option<Employee>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                id, job_title_id, national_id, first_name, last_name, age,
                home_address, landline, mobile
             FROM employee
             WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(employee_from_row).transpose()
    }

    async fn find_restaurant(
        &self,
        id: RestaurantId,
    ) -> Result<Option<Restaurant>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, tax_id, branch_number, city_id, street_address
             FROM restaurant
             WHERE id = ?",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(restaurant_from_row).transpose()
    }

    async fn delete_product(&self, id: ProductId) -> Result<(), RepositoryError> {
        let referenced = self
            .is_referenced(
                "SELECT EXISTS(
                    SELECT 1 FROM invoice_line_item WHERE product_id = ?1
                    UNION ALL
                    SELECT 1 FROM complaint_detail WHERE product_id = ?1
                 )",
                id.0,
            )
            .await?;
        if referenced {
            return Err(DomainError::ReferentialIntegrity(format!(
                "product {} is referenced by invoice lines or complaint details",
                id.0
            ))
            .into());
        }

        self.delete_row("DELETE FROM product WHERE id = ?", "product", id.0).await
    }

    async fn delete_customer(&self, id: CustomerId) -> Result<(), RepositoryError> {
        let referenced = self
            .is_referenced("SELECT EXISTS(SELECT 1 FROM invoice WHERE customer_id = ?)", id.0)
            .await?;
        if referenced {
            return Err(DomainError::ReferentialIntegrity(format!(
                "customer {} has invoices",
                id.0
            ))
            .into());
        }

        self.delete_row("DELETE FROM customer WHERE id = ?", "customer", id.0).await
    }

    async fn delete_employee(&self, id: EmployeeId) -> Result<(), RepositoryError> {
        let referenced = self
            .is_referenced(
                "SELECT EXISTS(
                    SELECT 1 FROM invoice WHERE employee_id = ?1
                    UNION ALL
                    SELECT 1 FROM resolution WHERE employee_id = ?1
                 )",
                id.0,
            )
            .await?;
        if referenced {
            return Err(DomainError::ReferentialIntegrity(format!(
                "employee {} issued invoices or closed complaints",
                id.0
            ))
            .into());
        }

        self.delete_row("DELETE FROM employee WHERE id = ?", "employee", id.0).await
    }
}

fn product_from_row(row: SqliteRow) -> Result<Product, RepositoryError> {
    Ok(Product {
        id: ProductId(row.try_get("id")?),
        name: row.try_get("name")?,
        price: parse_decimal("price", row.try_get("price")?)?,
        description: row.try_get("description")?,
    })
}

fn customer_from_row(row: SqliteRow) -> Result<Customer, RepositoryError> {
    Ok(Customer {
        id: CustomerId(row.try_get("id")?),
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
    })
}

fn restaurant_from_row(row: SqliteRow) -> Result<Restaurant, RepositoryError> {
    Ok(Restaurant {
        id: RestaurantId(row.try_get("id")?),
        name: row.try_get("name")?,
        tax_id: row.try_get("tax_id")?,
        branch_number: parse_u32("branch_number", row.try_get("branch_number")?)?,
        city_id: CityId(row.try_get("city_id")?),
        street_address: row.try_get("street_address")?,
    })
}

fn employee_from_row(row: SqliteRow) -> Result<Employee, RepositoryError> {
    let age = row
        .try_get::<Option<i64>, _>("age")?
        .map(|value| parse_u32("age", value))
        .transpose()?;

    Ok(Employee {
        id: EmployeeId(row.try_get("id")?),
        job_title_id: JobTitleId(row.try_get("job_title_id")?),
        national_id: row.try_get("national_id")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        age,
        home_address: row.try_get("home_address")?,
        landline: row.try_get("landline")?,
        mobile: row.try_get("mobile")?,
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use comanda_core::domain::catalog::{CountryId, NewCustomer, NewProduct};
    use comanda_core::errors::DomainError;

    use super::SqlReferenceCatalog;
    use crate::repositories::test_support::{seed_catalog, setup_pool};
    use crate::repositories::{ReferenceCatalog, RepositoryError};

    #[tokio::test]
    async fn duplicate_customer_email_is_a_uniqueness_violation() {
        let pool = setup_pool().await;
        let catalog = SqlReferenceCatalog::new(pool.clone());
        let customer = NewCustomer {
            name: "Maria Paz".to_string(),
            email: "maria@example.com".to_string(),
            phone: "0990000000".to_string(),
        };

        catalog.create_customer(customer.clone()).await.expect("first customer");
        let error = catalog.create_customer(customer).await.expect_err("duplicate email");

        assert!(matches!(error, RepositoryError::Domain(DomainError::UniquenessViolation(_))));
        assert!(error.is_retryable());
        pool.close().await;
    }

    #[tokio::test]
    async fn province_requires_an_existing_country() {
        let pool = setup_pool().await;
        let catalog = SqlReferenceCatalog::new(pool.clone());

        let error = catalog
            .create_province(CountryId(404), "Azuay".to_string())
            .await
            .expect_err("unknown country");

        assert!(matches!(error, RepositoryError::Domain(DomainError::ReferentialIntegrity(_))));
        pool.close().await;
    }

    #[tokio::test]
    async fn product_price_is_validated_and_updated() {
        let pool = setup_pool().await;
        let catalog = SqlReferenceCatalog::new(pool.clone());

        let error = catalog
            .create_product(NewProduct {
                name: "Ceviche".to_string(),
                price: Decimal::new(-1, 0),
                description: None,
            })
            .await
            .expect_err("negative price");
        assert!(matches!(error, RepositoryError::Domain(DomainError::Validation(_))));

        let product = catalog
            .create_product(NewProduct {
                name: "Ceviche".to_string(),
                price: Decimal::new(850, 2),
                description: Some("shrimp".to_string()),
            })
            .await
            .expect("create product");

        let updated =
            catalog.update_product_price(product.id, Decimal::new(900, 2)).await.expect("update");
        assert_eq!(updated.price, Decimal::new(900, 2));
        assert_eq!(catalog.find_product(product.id).await.expect("find"), Some(updated));

        pool.close().await;
    }

    #[tokio::test]
    async fn unreferenced_rows_can_be_deleted() {
        let pool = setup_pool().await;
        let seeded = seed_catalog(&pool).await;
        let catalog = SqlReferenceCatalog::new(pool.clone());

        catalog.delete_product(seeded.product_c).await.expect("delete unused product");
        assert_eq!(catalog.find_product(seeded.product_c).await.expect("find"), None);

        let error = catalog.delete_product(seeded.product_c).await.expect_err("already deleted");
        assert!(matches!(error, RepositoryError::Domain(DomainError::ReferentialIntegrity(_))));

        catalog.delete_customer(seeded.customer).await.expect("delete customer without invoices");
        assert_eq!(catalog.find_customer(seeded.customer).await.expect("find"), None);

        let employee = catalog.find_employee(seeded.employee).await.expect("find employee");
        assert_eq!(employee.map(|employee| employee.display_name()).as_deref(), Some("Lucia Mora"));

        let restaurant = catalog.find_restaurant(seeded.restaurant).await.expect("find restaurant");
        assert_eq!(restaurant.map(|restaurant| restaurant.branch_number), Some(1));

        pool.close().await;
    }
}
